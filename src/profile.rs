use std::sync::Arc;

use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::capsule::{Capsule, DeferredScroll};
use crate::data::{ProfileService, ReviewService};
use crate::events::{AppEvent, Bus};
use crate::model::{Follow, Profile, ReviewDetail, ReviewRef};
use crate::session::Viewer;
use crate::task::{self, CancelToken};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileState {
    pub profile: Option<Profile>,
    pub is_following: bool,
}

enum ProfileResponse {
    Loaded {
        request_id: u64,
        result: Result<Profile>,
    },
    Follow {
        request_id: u64,
        result: Result<()>,
    },
    Deleted {
        review_id: String,
        result: Result<()>,
    },
}

/// One profile page: header, follower lists and the profile's reviews.
pub struct ProfileView {
    profile_id: String,
    viewer: Option<Viewer>,
    profiles: Arc<dyn ProfileService>,
    reviews: Arc<dyn ReviewService>,
    bus: Bus<AppEvent>,
    events: Receiver<AppEvent>,
    state: ProfileState,
    loading: Option<u64>,
    follow_pending: Option<u64>,
    pending_deletes: Vec<(String, usize, ReviewDetail)>,
    scroll: DeferredScroll,
    token: CancelToken,
    response_tx: Sender<ProfileResponse>,
    response_rx: Receiver<ProfileResponse>,
    next_request_id: u64,
    last_error: Option<String>,
}

impl ProfileView {
    pub fn new(
        profile_id: impl Into<String>,
        viewer: Option<Viewer>,
        profiles: Arc<dyn ProfileService>,
        reviews: Arc<dyn ReviewService>,
        bus: &Bus<AppEvent>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            profile_id: profile_id.into(),
            viewer,
            profiles,
            reviews,
            bus: bus.clone(),
            events: bus.subscribe(),
            state: ProfileState::default(),
            loading: None,
            follow_pending: None,
            pending_deletes: Vec::new(),
            scroll: DeferredScroll::default(),
            token: CancelToken::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            last_error: None,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.state.profile.as_ref()
    }

    pub fn reviews(&self) -> &[ReviewDetail] {
        self.state
            .profile
            .as_ref()
            .map(|profile| profile.detailed_reviews.as_slice())
            .unwrap_or_default()
    }

    pub fn is_following(&self) -> bool {
        self.state.is_following
    }

    pub fn is_own(&self) -> bool {
        self.viewer
            .as_ref()
            .is_some_and(|viewer| viewer.profile_id == self.profile_id)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    pub fn follow_pending(&self) -> bool {
        self.follow_pending.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Restores from a capsule, or loads. A capsule taken before the profile
    /// arrived loads it again.
    pub fn activate(&mut self, capsule: Option<Capsule<ProfileState>>) -> bool {
        match capsule {
            Some(Capsule {
                state,
                scroll_offset,
            }) => {
                self.state = state;
                self.scroll.schedule(scroll_offset);
                if self.state.profile.is_some() {
                    return false;
                }
                self.load();
                true
            }
            None => {
                self.load();
                true
            }
        }
    }

    pub fn capture(&self, scroll_offset: usize) -> Capsule<ProfileState> {
        Capsule {
            state: self.state.clone(),
            scroll_offset,
        }
    }

    pub fn take_scroll(&mut self, rendered: usize) -> Option<usize> {
        self.scroll.take_after_render(rendered)
    }

    /// (Re)loads the profile. A newer load supersedes an older one.
    pub fn load(&mut self) {
        let request_id = self.next_request_id();
        self.loading = Some(request_id);
        let profiles = self.profiles.clone();
        let profile_id = self.profile_id.clone();
        tracing::debug!(profile = %profile_id, "profile: loading");
        task::spawn(&self.token, &self.response_tx, move || {
            ProfileResponse::Loaded {
                request_id,
                result: profiles.profile(&profile_id),
            }
        });
    }

    /// Flips the follow state and the follower list locally. Returns the new
    /// state, or `None` when there is nothing to toggle.
    pub fn begin_follow_toggle(&mut self) -> Option<bool> {
        let viewer = self.viewer.as_ref()?;
        if self.is_own() || self.follow_pending.is_some() {
            return None;
        }
        let profile = self.state.profile.as_mut()?;
        let following = !self.state.is_following;
        if following {
            profile.followers.push(Follow {
                follower_id: viewer.profile_id.clone(),
                following_id: self.profile_id.clone(),
            });
        } else {
            profile
                .followers
                .retain(|follow| follow.follower_id != viewer.profile_id);
        }
        self.state.is_following = following;
        Some(following)
    }

    /// Settles a toggle started by `begin_follow_toggle`; a failure puts the
    /// previous state back.
    pub fn finish_follow_toggle(&mut self, result: Result<()>) {
        self.follow_pending = None;
        let Err(err) = result else {
            return;
        };
        let Some(viewer) = self.viewer.clone() else {
            return;
        };
        let restored = !self.state.is_following;
        if let Some(profile) = self.state.profile.as_mut() {
            if restored {
                profile.followers.push(Follow {
                    follower_id: viewer.profile_id.clone(),
                    following_id: self.profile_id.clone(),
                });
            } else {
                profile
                    .followers
                    .retain(|follow| follow.follower_id != viewer.profile_id);
            }
        }
        self.state.is_following = restored;
        self.fail("update follow", err);
    }

    pub fn toggle_follow(&mut self) -> Result<()> {
        let Some(viewer) = self.viewer.clone() else {
            bail!(crate::session::SessionError::NotLoggedIn);
        };
        let Some(following) = self.begin_follow_toggle() else {
            bail!("nothing to follow");
        };
        let request_id = self.next_request_id();
        self.follow_pending = Some(request_id);
        let profiles = self.profiles.clone();
        let followee = self.profile_id.clone();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = if following {
                profiles.follow(&viewer.profile_id, &followee)
            } else {
                profiles.unfollow(&viewer.profile_id, &followee)
            };
            ProfileResponse::Follow { request_id, result }
        });
        Ok(())
    }

    /// Removes one of the viewer's own reviews right away; it comes back at
    /// the same position if the server refuses.
    pub fn delete_review(&mut self, review_id: &str) -> Result<()> {
        if !self.is_own() {
            bail!("only the author can delete this review");
        }
        let Some(profile) = self.state.profile.as_mut() else {
            bail!("profile is not loaded");
        };
        let Some(index) = profile
            .detailed_reviews
            .iter()
            .position(|review| review.id == review_id)
        else {
            bail!("review {review_id} is not on this profile");
        };
        let review = profile.detailed_reviews.remove(index);
        profile.reviews.retain(|r| r.id != review_id);

        let reviews = self.reviews.clone();
        let profile_id = self.profile_id.clone();
        let media_id = review.media_id.clone();
        let review_id = review.id.clone();
        self.pending_deletes.push((review_id.clone(), index, review));
        task::spawn(&self.token, &self.response_tx, move || {
            let result = reviews.delete_review(&profile_id, &media_id);
            ProfileResponse::Deleted { review_id, result }
        });
        Ok(())
    }

    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            if self.token.is_cancelled() {
                continue;
            }
            changed |= self.handle_response(message);
        }
        while let Ok(event) = self.events.try_recv() {
            changed |= self.handle_event(event);
        }
        changed
    }

    /// Unmounts the view; late responses are dropped.
    pub fn close(&self) {
        self.token.cancel();
    }

    fn handle_response(&mut self, message: ProfileResponse) -> bool {
        match message {
            ProfileResponse::Loaded { request_id, result } => {
                if self.loading != Some(request_id) {
                    return false;
                }
                self.loading = None;
                match result {
                    Ok(profile) => {
                        self.state.is_following = self.viewer.as_ref().is_some_and(|viewer| {
                            profile
                                .followers
                                .iter()
                                .any(|follow| follow.follower_id == viewer.profile_id)
                        });
                        self.state.profile = Some(profile);
                        self.last_error = None;
                    }
                    Err(err) => self.fail("load profile", err),
                }
                true
            }
            ProfileResponse::Follow { request_id, result } => {
                if self.follow_pending != Some(request_id) {
                    return false;
                }
                self.finish_follow_toggle(result);
                true
            }
            ProfileResponse::Deleted { review_id, result } => {
                let Some(slot) = self
                    .pending_deletes
                    .iter()
                    .position(|(id, _, _)| *id == review_id)
                else {
                    return false;
                };
                let (review_id, index, review) = self.pending_deletes.remove(slot);
                match result {
                    Ok(()) => {
                        self.bus.publish(AppEvent::ReviewDeleted { review_id });
                        false
                    }
                    Err(err) => {
                        if let Some(profile) = self.state.profile.as_mut() {
                            let index = index.min(profile.detailed_reviews.len());
                            profile.reviews.push(ReviewRef {
                                id: review.id.clone(),
                            });
                            profile.detailed_reviews.insert(index, review);
                        }
                        self.fail("delete review", err);
                        true
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: AppEvent) -> bool {
        let Some(profile) = self.state.profile.as_mut() else {
            return false;
        };
        match event {
            AppEvent::ReviewPosted(review) => {
                if review.profile_id != self.profile_id
                    || profile.detailed_reviews.iter().any(|r| r.id == review.id)
                {
                    return false;
                }
                profile.reviews.insert(
                    0,
                    ReviewRef {
                        id: review.id.clone(),
                    },
                );
                profile.detailed_reviews.insert(0, review);
                true
            }
            AppEvent::ReviewDeleted { review_id } => {
                let before = profile.detailed_reviews.len();
                profile.detailed_reviews.retain(|r| r.id != review_id);
                profile.reviews.retain(|r| r.id != review_id);
                profile.detailed_reviews.len() != before
            }
        }
    }

    fn fail(&mut self, action: &str, err: anyhow::Error) {
        tracing::warn!(profile = %self.profile_id, error = %format!("{err:#}"), "profile: {action} failed");
        self.last_error = Some(format!("Could not {action}: {err:#}"));
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

impl Drop for ProfileView {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::data::{FixtureProfileService, FixtureReviewService, Fixtures};
    use crate::model::{CreateReviewRequest, CreatedReview, UserIds};
    use crate::task::poll_until;

    fn viewer(name: &str) -> Viewer {
        Viewer {
            profile_id: format!("profile-{name}"),
            username: name.into(),
        }
    }

    fn demo_view(profile: &str, as_user: &str) -> (ProfileView, Bus<AppEvent>, Fixtures) {
        let fixtures = Fixtures::demo();
        let bus = Bus::new();
        let view = ProfileView::new(
            format!("profile-{profile}"),
            Some(viewer(as_user)),
            Arc::new(FixtureProfileService::new(fixtures.clone())),
            Arc::new(FixtureReviewService::new(fixtures.clone())),
            &bus,
        );
        (view, bus, fixtures)
    }

    fn loaded(view: &mut ProfileView) {
        view.activate(None);
        poll_until(view, ProfileView::poll, |view| !view.is_loading());
    }

    struct Refusing;

    impl ProfileService for Refusing {
        fn profile(&self, profile_id: &str) -> Result<Profile> {
            Ok(Profile {
                id: profile_id.into(),
                detailed_reviews: vec![ReviewDetail {
                    id: "r-x".into(),
                    profile_id: profile_id.into(),
                    ..ReviewDetail::default()
                }],
                ..Profile::default()
            })
        }
        fn ids_for_username(&self, _: &str) -> Result<UserIds> {
            Err(anyhow!("unsupported"))
        }
        fn follow(&self, _: &str, _: &str) -> Result<()> {
            Err(anyhow!("service unavailable"))
        }
        fn unfollow(&self, _: &str, _: &str) -> Result<()> {
            Err(anyhow!("service unavailable"))
        }
    }

    impl ReviewService for Refusing {
        fn review_detail(&self, _: &str) -> Result<ReviewDetail> {
            Err(anyhow!("unsupported"))
        }
        fn add_review(&self, _: &str, _: &CreateReviewRequest) -> Result<CreatedReview> {
            Err(anyhow!("unsupported"))
        }
        fn delete_review(&self, _: &str, _: &str) -> Result<()> {
            Err(anyhow!("service unavailable"))
        }
        fn like(&self, _: &str, _: &str) -> Result<()> {
            Err(anyhow!("unsupported"))
        }
        fn unlike(&self, _: &str, _: &str) -> Result<()> {
            Err(anyhow!("unsupported"))
        }
    }

    fn refusing_view(profile: &str, as_user: &str) -> ProfileView {
        let refusing = Arc::new(Refusing);
        ProfileView::new(
            format!("profile-{profile}"),
            Some(viewer(as_user)),
            refusing.clone(),
            refusing,
            &Bus::new(),
        )
    }

    #[test]
    fn following_is_derived_from_followers() {
        let (mut view, _bus, _) = demo_view("ben", "ana");
        loaded(&mut view);
        assert!(view.is_following());
        assert!(!view.is_own());

        let (mut view, _bus, _) = demo_view("cy", "ben");
        loaded(&mut view);
        assert!(!view.is_following());
    }

    #[test]
    fn follow_toggle_reaches_server() {
        let (mut view, _bus, fixtures) = demo_view("cy", "ben");
        loaded(&mut view);
        view.toggle_follow().unwrap();
        assert!(view.is_following());
        assert!(view.follow_pending());
        poll_until(&mut view, ProfileView::poll, |view| !view.follow_pending());
        assert!(view.is_following());

        let mut again = ProfileView::new(
            "profile-cy",
            Some(viewer("ben")),
            Arc::new(FixtureProfileService::new(fixtures.clone())),
            Arc::new(FixtureReviewService::new(fixtures)),
            &Bus::new(),
        );
        loaded(&mut again);
        assert!(again.is_following());
    }

    #[test]
    fn failed_follow_is_reverted() {
        let mut view = refusing_view("cy", "ben");
        loaded(&mut view);
        view.toggle_follow().unwrap();
        assert_eq!(view.profile().unwrap().followers.len(), 1);
        poll_until(&mut view, ProfileView::poll, |view| !view.follow_pending());
        assert!(!view.is_following());
        assert!(view.profile().unwrap().followers.is_empty());
        assert!(view.last_error().unwrap().contains("service unavailable"));
    }

    #[test]
    fn cannot_follow_yourself() {
        let (mut view, _bus, _) = demo_view("ana", "ana");
        loaded(&mut view);
        assert!(view.is_own());
        assert_eq!(view.begin_follow_toggle(), None);
    }

    #[test]
    fn failed_delete_restores_review() {
        let mut view = refusing_view("ana", "ana");
        loaded(&mut view);
        view.delete_review("r-x").unwrap();
        assert!(view.reviews().is_empty());
        poll_until(&mut view, ProfileView::poll, |view| view.last_error().is_some());
        assert_eq!(view.reviews().len(), 1);
        assert_eq!(view.reviews()[0].id, "r-x");
    }

    #[test]
    fn delete_broadcasts_on_success() {
        let (mut view, bus, _) = demo_view("ana", "ana");
        let listener = bus.subscribe();
        loaded(&mut view);
        let id = view.reviews()[0].id.clone();
        view.delete_review(&id).unwrap();
        poll_until(&mut view, ProfileView::poll, |view| view.pending_deletes.is_empty());
        assert_eq!(
            listener.try_recv().unwrap(),
            AppEvent::ReviewDeleted { review_id: id }
        );
    }

    #[test]
    fn posted_review_is_prepended_on_own_profile() {
        let (mut view, bus, _) = demo_view("ana", "ana");
        loaded(&mut view);
        let before = view.reviews().len();
        bus.publish(AppEvent::ReviewPosted(ReviewDetail {
            id: "fresh".into(),
            profile_id: "profile-ana".into(),
            ..ReviewDetail::default()
        }));
        bus.publish(AppEvent::ReviewPosted(ReviewDetail {
            id: "elsewhere".into(),
            profile_id: "profile-ben".into(),
            ..ReviewDetail::default()
        }));
        assert!(view.poll());
        assert_eq!(view.reviews().len(), before + 1);
        assert_eq!(view.reviews()[0].id, "fresh");
    }

    #[test]
    fn capsule_taken_before_profile_arrives_loads_it() {
        let (mut view, _bus, _) = demo_view("ben", "ana");
        view.activate(None);
        let capsule = view.capture(0);
        assert!(capsule.state.profile.is_none());
        drop(view);

        let (mut restored, _bus, _) = demo_view("ben", "ana");
        assert!(restored.activate(Some(capsule)));
        poll_until(&mut restored, ProfileView::poll, |view| !view.is_loading());
        assert_eq!(restored.profile().unwrap().id, "profile-ben");
        assert!(restored.is_following());
    }

    #[test]
    fn restored_profile_skips_fetch() {
        let (mut view, _bus, _) = demo_view("ben", "ana");
        loaded(&mut view);
        let capsule = view.capture(3);
        drop(view);

        let (mut restored, _bus, _) = demo_view("ben", "ana");
        assert!(!restored.activate(Some(capsule.clone())));
        assert!(!restored.is_loading());
        assert_eq!(restored.capture(3), capsule);
    }
}
