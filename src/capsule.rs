use std::collections::HashMap;
use std::hash::Hash;

/// Snapshot of a view's state taken when leaving it.
#[derive(Debug, Clone, PartialEq)]
pub struct Capsule<S> {
    pub state: S,
    pub scroll_offset: usize,
}

pub fn capture<S: Clone>(state: &S, scroll_offset: usize) -> Capsule<S> {
    Capsule {
        state: state.clone(),
        scroll_offset,
    }
}

/// How a view comes up: from a capsule, or with its usual mount fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation<S> {
    Restore(Capsule<S>),
    Fresh,
}

impl<S> Activation<S> {
    pub fn from_capsule(capsule: Option<Capsule<S>>) -> Self {
        match capsule {
            Some(capsule) => Activation::Restore(capsule),
            None => Activation::Fresh,
        }
    }

    pub fn should_fetch(&self) -> bool {
        matches!(self, Activation::Fresh)
    }
}

#[derive(Debug)]
struct Entry<R, S> {
    route: R,
    capsule: Option<Capsule<S>>,
}

/// Route history. Leaving a view stores its capsule on that view's entry;
/// going back hands the capsule out once.
#[derive(Debug)]
pub struct Navigator<R, S> {
    stack: Vec<Entry<R, S>>,
}

impl<R: Clone, S> Navigator<R, S> {
    pub fn new(root: R) -> Self {
        Self {
            stack: vec![Entry {
                route: root,
                capsule: None,
            }],
        }
    }

    pub fn current(&self) -> &R {
        // The root entry is never popped.
        &self.stack[self.stack.len() - 1].route
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn can_go_back(&self) -> bool {
        self.stack.len() > 1
    }

    /// Leaves the current route for `route`, parking `outgoing` on the entry
    /// being left.
    pub fn push(&mut self, route: R, outgoing: Option<Capsule<S>>) {
        if let Some(entry) = self.stack.last_mut() {
            entry.capsule = outgoing;
        }
        self.stack.push(Entry {
            route,
            capsule: None,
        });
    }

    /// Replaces the current route without keeping it in history.
    pub fn replace(&mut self, route: R) {
        if let Some(entry) = self.stack.last_mut() {
            entry.route = route;
            entry.capsule = None;
        }
    }

    /// Returns to the previous route and the capsule left there, consuming
    /// it.
    pub fn back(&mut self) -> Option<(R, Activation<S>)> {
        if !self.can_go_back() {
            return None;
        }
        self.stack.pop();
        let entry = self.stack.last_mut()?;
        Some((entry.route.clone(), Activation::from_capsule(entry.capsule.take())))
    }

    /// Drops history down to the root, e.g. on logout.
    pub fn reset(&mut self, root: R) {
        self.stack.clear();
        self.stack.push(Entry {
            route: root,
            capsule: None,
        });
    }
}

/// One capsule per tab, independent of route history.
#[derive(Debug, Clone)]
pub struct TabSlots<K, S> {
    slots: HashMap<K, Capsule<S>>,
}

impl<K, S> Default for TabSlots<K, S> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, S> TabSlots<K, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, tab: K, capsule: Capsule<S>) {
        self.slots.insert(tab, capsule);
    }

    pub fn take(&mut self, tab: &K) -> Option<Capsule<S>> {
        self.slots.remove(tab)
    }

    pub fn contains(&self, tab: &K) -> bool {
        self.slots.contains_key(tab)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut Capsule<S>)> {
        self.slots.iter_mut()
    }
}

/// Scroll position waiting for its list to be drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredScroll {
    pending: Option<usize>,
}

impl DeferredScroll {
    pub fn schedule(&mut self, offset: usize) {
        self.pending = Some(offset);
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Called after a frame was drawn with `rendered` rows. Nothing is
    /// applied against an empty list; the request stays queued instead.
    pub fn take_after_render(&mut self, rendered: usize) -> Option<usize> {
        if rendered == 0 {
            return None;
        }
        self.pending.take().map(|offset| offset.min(rendered - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Route {
        Home,
        Thread(String),
    }

    #[test]
    fn back_hands_out_capsule_once() {
        let mut nav: Navigator<Route, Vec<u32>> = Navigator::new(Route::Home);
        nav.push(Route::Thread("r1".into()), Some(capture(&vec![1, 2, 3], 2)));
        assert_eq!(nav.current(), &Route::Thread("r1".into()));

        let (route, activation) = nav.back().unwrap();
        assert_eq!(route, Route::Home);
        assert!(!activation.should_fetch());
        match activation {
            Activation::Restore(capsule) => {
                assert_eq!(capsule.state, vec![1, 2, 3]);
                assert_eq!(capsule.scroll_offset, 2);
            }
            Activation::Fresh => panic!("expected a capsule"),
        }
        assert!(nav.back().is_none());

        nav.push(Route::Thread("r2".into()), None);
        let (_, activation) = nav.back().unwrap();
        assert!(activation.should_fetch());
    }

    #[test]
    fn tab_slots_are_independent() {
        let mut slots: TabSlots<&str, u32> = TabSlots::new();
        slots.save("following", capture(&1, 4));
        slots.save("for-you", capture(&2, 0));
        assert_eq!(slots.take(&"following").unwrap().scroll_offset, 4);
        assert!(!slots.contains(&"following"));
        assert!(slots.contains(&"for-you"));
    }

    #[test]
    fn deferred_scroll_waits_for_rows() {
        let mut scroll = DeferredScroll::default();
        scroll.schedule(12);
        assert_eq!(scroll.take_after_render(0), None);
        assert!(scroll.is_pending());
        assert_eq!(scroll.take_after_render(5), Some(4));
        assert_eq!(scroll.take_after_render(5), None);
    }
}
