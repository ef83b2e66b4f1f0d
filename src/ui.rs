use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Tabs, Wrap,
};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::capsule::{Activation, Capsule, DeferredScroll, Navigator};
use crate::config::Config;
use crate::data::Services;
use crate::events::{AppEvent, Bus};
use crate::feed::{FeedController, FeedKind, HomeState};
use crate::media::{self, MediaBrowser};
use crate::model::{FeedItem, Media, MediaType};
use crate::profile::{ProfileState, ProfileView};
use crate::session::{self, Identity};
use crate::task::{self, CancelToken};
use crate::thread::{ThreadController, ThreadState};
use crate::tree::{Row, SendState};

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const HIGHLIGHT_SYMBOL: &str = "▌ ";
const REVIEW_PREVIEW_LINES: usize = 4;
const SORT_ORDERS: [&str; 4] = ["", "title", "newest", "rating"];
const COMMENT_DEPTH_COLORS: [Color; 6] = [
    Color::Rgb(250, 179, 135),
    Color::Rgb(166, 227, 161),
    Color::Rgb(203, 166, 247),
    Color::Rgb(245, 194, 231),
    Color::Rgb(137, 220, 235),
    Color::Rgb(249, 226, 175),
];

fn comment_depth_color(depth: usize) -> Color {
    COMMENT_DEPTH_COLORS[depth % COMMENT_DEPTH_COLORS.len()]
}

/// Colours for one `ui.theme`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_focused_bg: Color,
    selected_bg: Color,
    border: Color,
    text_primary: Color,
    text_secondary: Color,
    accent: Color,
    success: Color,
    error: Color,
    depth_colors: bool,
}

impl Palette {
    const DEFAULT: Palette = Palette {
        bg: Color::Rgb(30, 30, 46),
        panel_bg: Color::Rgb(24, 24, 36),
        panel_focused_bg: Color::Rgb(49, 50, 68),
        selected_bg: Color::Rgb(69, 71, 90),
        border: Color::Rgb(137, 180, 250),
        text_primary: Color::Rgb(205, 214, 244),
        text_secondary: Color::Rgb(166, 173, 200),
        accent: Color::Rgb(137, 180, 250),
        success: Color::Rgb(166, 227, 161),
        error: Color::Rgb(243, 139, 168),
        depth_colors: true,
    };

    const MONO: Palette = Palette {
        bg: Color::Reset,
        panel_bg: Color::Reset,
        panel_focused_bg: Color::Reset,
        selected_bg: Color::DarkGray,
        border: Color::Gray,
        text_primary: Color::White,
        text_secondary: Color::Gray,
        accent: Color::White,
        success: Color::White,
        error: Color::White,
        depth_colors: false,
    };

    fn named(name: &str) -> Palette {
        match name.trim().to_ascii_lowercase().as_str() {
            "mono" | "plain" => Palette::MONO,
            _ => Palette::DEFAULT,
        }
    }

    fn depth(&self, depth: usize) -> Color {
        if self.depth_colors {
            comment_depth_color(depth)
        } else {
            self.text_secondary
        }
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Login,
    Home,
    Thread(String),
    Profile { id: String, name: String },
    Media,
}

/// What a route entry keeps while another view is on screen.
#[derive(Debug, Clone)]
enum ViewState {
    Home(HomeState),
    Thread(ThreadState),
    Profile(ProfileState),
}

fn restore_as<S>(
    activation: Activation<ViewState>,
    pick: fn(ViewState) -> Option<S>,
) -> Option<Capsule<S>> {
    match activation {
        Activation::Restore(Capsule {
            state,
            scroll_offset,
        }) => pick(state).map(|state| Capsule {
            state,
            scroll_offset,
        }),
        Activation::Fresh => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LoginField {
    #[default]
    Username,
    Password,
}

#[derive(Debug, Default)]
struct LoginForm {
    username: String,
    password: String,
    field: LoginField,
    pending: bool,
    status: String,
}

impl LoginForm {
    fn active_value_mut(&mut self) -> &mut String {
        match self.field {
            LoginField::Username => &mut self.username,
            LoginField::Password => &mut self.password,
        }
    }

    fn next_field(&mut self) {
        self.field = match self.field {
            LoginField::Username => LoginField::Password,
            LoginField::Password => LoginField::Username,
        };
    }
}

enum View {
    Login(LoginForm),
    Home(FeedController),
    Thread {
        controller: ThreadController,
        scroll: DeferredScroll,
    },
    Profile(ProfileView),
    Media {
        browser: MediaBrowser,
        editing_search: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum ComposeTarget {
    Comment { parent: Option<String> },
    Edit { comment_id: String },
    Review { media: Media, rating: u8 },
}

#[derive(Debug, Clone, PartialEq)]
struct Compose {
    target: ComposeTarget,
    text: String,
}

impl Compose {
    fn new(target: ComposeTarget) -> Self {
        Self {
            target,
            text: String::new(),
        }
    }

    fn with_text(target: ComposeTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
        }
    }

    fn title(&self) -> String {
        match &self.target {
            ComposeTarget::Comment { parent: None } => "New comment".to_string(),
            ComposeTarget::Comment { parent: Some(_) } => "Reply".to_string(),
            ComposeTarget::Edit { .. } => "Edit comment".to_string(),
            ComposeTarget::Review { media, .. } => format!("Review {}", media.title),
        }
    }
}

/// Puts a review that failed to post back into the compose box, unless the
/// box is already in use.
fn reopen_failed_review(compose: &mut Option<Compose>, browser: &mut MediaBrowser) -> bool {
    if compose.is_some() {
        return false;
    }
    let Some(draft) = browser.take_failed_post() else {
        return false;
    };
    *compose = Some(Compose::with_text(
        ComposeTarget::Review {
            media: draft.media,
            rating: draft.rating,
        },
        draft.content,
    ));
    true
}

enum Action {
    None,
    Open(Route),
    Back,
    Quit,
    Compose(Compose),
    Logout,
}

enum UiResponse {
    Login(Result<Identity>),
}

pub struct Options {
    pub services: Services,
    pub session: Arc<session::Manager>,
    pub config: Config,
    pub bus: Bus<AppEvent>,
    pub status_message: String,
}

pub struct Model {
    services: Services,
    session: Arc<session::Manager>,
    config: Config,
    bus: Bus<AppEvent>,
    events: Receiver<AppEvent>,
    palette: Palette,
    nav: Navigator<Route, ViewState>,
    view: View,
    selected: usize,
    list_state: ListState,
    rendered_rows: usize,
    last_item_visible: bool,
    compose: Option<Compose>,
    comment_deltas: Vec<(String, i64)>,
    status_message: String,
    spinner: Spinner,
    needs_redraw: bool,
    token: CancelToken,
    response_tx: Sender<UiResponse>,
    response_rx: Receiver<UiResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let root = if opts.session.current().is_some() {
            Route::Home
        } else {
            Route::Login
        };
        let mut model = Self {
            events: opts.bus.subscribe(),
            palette: Palette::named(&opts.config.ui.theme),
            services: opts.services,
            session: opts.session,
            config: opts.config,
            bus: opts.bus,
            nav: Navigator::new(root.clone()),
            view: View::Login(LoginForm::default()),
            selected: 0,
            list_state: ListState::default(),
            rendered_rows: 0,
            last_item_visible: false,
            compose: None,
            comment_deltas: Vec::new(),
            status_message: opts.status_message,
            spinner: Spinner::new(),
            needs_redraw: true,
            token: CancelToken::new(),
            response_tx,
            response_rx,
        };
        model.view = model.mount(&root, Activation::Fresh);
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        self.token.cancel();

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
                self.after_render();
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err:#}");
                            }
                        }
                        self.mark_dirty();
                    }
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        match &self.view {
            View::Login(form) => form.pending,
            View::Home(feed) => feed.is_loading() || feed.recommendations_loading(),
            View::Thread { controller, .. } => controller.is_loading(),
            View::Profile(profile) => profile.is_loading() || profile.follow_pending(),
            View::Media { browser, .. } => {
                browser.is_loading() || browser.is_searching() || browser.is_posting()
            }
        }
    }

    fn view_error(&self) -> Option<&str> {
        match &self.view {
            View::Login(_) => None,
            View::Home(feed) => feed.last_error(),
            View::Thread { controller, .. } => controller.last_error(),
            View::Profile(profile) => profile.last_error(),
            View::Media { browser, .. } => browser.last_error(),
        }
    }

    fn mount(&mut self, route: &Route, activation: Activation<ViewState>) -> View {
        let viewer = self.session.viewer();
        match route {
            Route::Login => View::Login(LoginForm::default()),
            Route::Home => {
                let Some(viewer) = viewer else {
                    return View::Login(LoginForm::default());
                };
                let mut feed = FeedController::new(
                    self.services.feed.clone(),
                    self.services.reviews.clone(),
                    viewer,
                    self.config.feed.page_size,
                    &self.bus,
                );
                feed.activate(restore_as(activation, |state| match state {
                    ViewState::Home(state) => Some(state),
                    _ => None,
                }));
                for (review_id, delta) in self.comment_deltas.drain(..) {
                    feed.adjust_comment_count(&review_id, delta);
                }
                View::Home(feed)
            }
            Route::Thread(review_id) => {
                let mut controller = ThreadController::new(
                    review_id.clone(),
                    viewer,
                    self.services.comments.clone(),
                    self.services.reviews.clone(),
                );
                let mut scroll = DeferredScroll::default();
                let restored = restore_as(activation, |state| match state {
                    ViewState::Thread(state) => Some(state),
                    _ => None,
                });
                match restored {
                    Some(capsule) => {
                        scroll.schedule(capsule.scroll_offset);
                        controller.activate(Some(capsule.state));
                    }
                    None => {
                        controller.activate(None);
                    }
                }
                View::Thread { controller, scroll }
            }
            Route::Profile { id, .. } => {
                let mut profile = ProfileView::new(
                    id.clone(),
                    viewer,
                    self.services.profiles.clone(),
                    self.services.reviews.clone(),
                    &self.bus,
                );
                profile.activate(restore_as(activation, |state| match state {
                    ViewState::Profile(state) => Some(state),
                    _ => None,
                }));
                View::Profile(profile)
            }
            Route::Media => {
                let mut browser = MediaBrowser::new(
                    self.services.media.clone(),
                    self.services.reviews.clone(),
                    viewer,
                    &self.config.media,
                    &self.bus,
                );
                browser.activate();
                View::Media {
                    browser,
                    editing_search: false,
                }
            }
        }
    }

    fn capture_current(&self) -> Option<Capsule<ViewState>> {
        let offset = self.selected;
        match &self.view {
            View::Home(feed) => {
                let capsule = feed.capture(offset);
                Some(Capsule {
                    state: ViewState::Home(capsule.state),
                    scroll_offset: capsule.scroll_offset,
                })
            }
            View::Thread { controller, .. } => Some(Capsule {
                state: ViewState::Thread(controller.capture()),
                scroll_offset: offset,
            }),
            View::Profile(profile) => {
                let capsule = profile.capture(offset);
                Some(Capsule {
                    state: ViewState::Profile(capsule.state),
                    scroll_offset: capsule.scroll_offset,
                })
            }
            View::Login(_) | View::Media { .. } => None,
        }
    }

    fn leave_current(&mut self) {
        if let View::Thread { controller, .. } = &self.view {
            let delta = controller.comment_delta();
            if delta != 0 {
                self.comment_deltas
                    .push((controller.review_id().to_string(), delta));
            }
        }
    }

    fn show(&mut self, view: View) {
        // Replacing the view drops the old controller, which cancels its
        // outstanding requests.
        self.view = view;
        self.selected = 0;
        self.list_state = ListState::default();
        self.rendered_rows = 0;
        self.last_item_visible = false;
        self.compose = None;
        self.mark_dirty();
    }

    fn navigate(&mut self, route: Route) {
        if self.nav.current() == &route {
            return;
        }
        let outgoing = self.capture_current();
        self.leave_current();
        self.nav.push(route.clone(), outgoing);
        tracing::debug!(route = ?route, depth = self.nav.depth(), "ui: navigate");
        let view = self.mount(&route, Activation::Fresh);
        self.show(view);
    }

    fn go_back(&mut self) -> bool {
        let Some((route, activation)) = self.nav.back() else {
            return false;
        };
        self.leave_current();
        tracing::debug!(route = ?route, restored = !activation.should_fetch(), "ui: back");
        let view = self.mount(&route, activation);
        self.show(view);
        true
    }

    fn reset_to(&mut self, route: Route) {
        self.nav.reset(route.clone());
        self.comment_deltas.clear();
        let view = self.mount(&route, Activation::Fresh);
        self.show(view);
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            changed |= self.handle_ui_response(message);
        }
        while let Ok(event) = self.events.try_recv() {
            self.status_message = match &event {
                AppEvent::ReviewPosted(review) => {
                    format!("Review of {} posted.", review.media_title)
                }
                AppEvent::ReviewDeleted { .. } => "Review deleted.".to_string(),
            };
            changed = true;
        }
        changed |= match &mut self.view {
            View::Login(_) => false,
            View::Home(feed) => feed.poll(),
            View::Thread { controller, .. } => controller.poll(),
            View::Profile(profile) => profile.poll(),
            View::Media { browser, .. } => {
                let ticked = browser.tick(Instant::now());
                let polled = browser.poll();
                let reopened = reopen_failed_review(&mut self.compose, browser);
                polled || ticked || reopened
            }
        };
        changed
    }

    fn handle_ui_response(&mut self, message: UiResponse) -> bool {
        match message {
            UiResponse::Login(Ok(identity)) => {
                self.status_message = format!("Signed in as {}.", identity.username);
                self.reset_to(Route::Home);
            }
            UiResponse::Login(Err(err)) => {
                tracing::warn!(error = %format!("{err:#}"), "ui: login failed");
                if let View::Login(form) = &mut self.view {
                    form.pending = false;
                    form.status = format!("{err:#}");
                }
            }
        }
        true
    }

    fn after_render(&mut self) {
        let rendered = self.rendered_rows;
        let restored = match &mut self.view {
            View::Home(feed) => feed.take_scroll(rendered),
            View::Thread { scroll, .. } => scroll.take_after_render(rendered),
            View::Profile(profile) => profile.take_scroll(rendered),
            View::Login(_) | View::Media { .. } => None,
        };
        if let Some(offset) = restored {
            self.selected = offset;
            self.list_state.select(Some(offset));
            self.mark_dirty();
        }
        if self.last_item_visible {
            let requested = match &mut self.view {
                View::Home(feed) => feed.on_last_item_visible(),
                View::Media { browser, .. } => browser.on_last_item_visible(),
                _ => false,
            };
            if requested {
                self.mark_dirty();
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(true);
        }
        if self.compose.is_some() {
            self.handle_compose_key(key.code)?;
            return Ok(false);
        }
        let on_login = matches!(self.view, View::Login(_));
        let searching = matches!(
            self.view,
            View::Media {
                editing_search: true,
                ..
            }
        );
        let action = if on_login {
            self.handle_login_key(key.code)
        } else if searching {
            self.handle_search_key(key.code)
        } else {
            match key.code {
                KeyCode::Char('q') => Action::Quit,
                KeyCode::Esc | KeyCode::Char('h') | KeyCode::Backspace => Action::Back,
                KeyCode::Char('j') | KeyCode::Down => {
                    self.move_selection(1);
                    Action::None
                }
                KeyCode::Char('k') | KeyCode::Up => {
                    self.move_selection(-1);
                    Action::None
                }
                KeyCode::PageDown => {
                    self.move_selection(5);
                    Action::None
                }
                KeyCode::PageUp => {
                    self.move_selection(-5);
                    Action::None
                }
                code => self.handle_view_key(code)?,
            }
        };
        Ok(self.apply(action))
    }

    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::None => {}
            Action::Open(route) => self.navigate(route),
            Action::Back => {
                if !self.go_back() {
                    self.status_message = "Press q to quit.".to_string();
                }
            }
            Action::Quit => return true,
            Action::Compose(compose) => self.compose = Some(compose),
            Action::Logout => {
                if let Err(err) = self.session.logout() {
                    self.status_message = format!("Error: {err:#}");
                } else {
                    self.status_message = "Signed out.".to_string();
                    self.reset_to(Route::Login);
                }
            }
        }
        false
    }

    fn move_selection(&mut self, delta: i32) {
        let len = self.rendered_rows;
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = (self.selected as i64 + i64::from(delta)).clamp(0, len as i64 - 1);
        self.selected = next as usize;
        self.list_state.select(Some(self.selected));
    }

    fn handle_login_key(&mut self, code: KeyCode) -> Action {
        let View::Login(form) = &mut self.view else {
            return Action::None;
        };
        if form.pending {
            return if code == KeyCode::Esc {
                Action::Quit
            } else {
                Action::None
            };
        }
        match code {
            KeyCode::Esc => return Action::Quit,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Down | KeyCode::Up => form.next_field(),
            KeyCode::Backspace => {
                form.active_value_mut().pop();
            }
            KeyCode::Char(ch) => form.active_value_mut().push(ch),
            KeyCode::Enter => {
                if form.field == LoginField::Username && form.password.is_empty() {
                    form.next_field();
                    return Action::None;
                }
                form.pending = true;
                form.status = "Signing in…".to_string();
                let session = self.session.clone();
                let auth = self.services.auth.clone();
                let username = form.username.clone();
                let password = form.password.clone();
                task::spawn(&self.token, &self.response_tx, move || {
                    UiResponse::Login(session.authenticate(auth.as_ref(), &username, &password))
                });
            }
            _ => {}
        }
        Action::None
    }

    fn handle_search_key(&mut self, code: KeyCode) -> Action {
        let View::Media {
            browser,
            editing_search,
        } = &mut self.view
        else {
            return Action::None;
        };
        let mut text = browser.draft_query().to_string();
        match code {
            KeyCode::Esc | KeyCode::Enter => {
                *editing_search = false;
                return Action::None;
            }
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(ch) => text.push(ch),
            _ => return Action::None,
        }
        browser.set_query(&text, Instant::now());
        self.selected = 0;
        self.list_state.select(Some(0));
        Action::None
    }

    fn handle_view_key(&mut self, code: KeyCode) -> Result<Action> {
        let selected = self.selected;
        let own_profile = self.session.viewer().map(|viewer| Route::Profile {
            id: viewer.profile_id,
            name: viewer.username,
        });
        let action = match &mut self.view {
            View::Login(_) => Action::None,
            View::Home(feed) => {
                let item = feed.items().get(selected).cloned();
                match code {
                    KeyCode::Tab | KeyCode::BackTab => {
                        let next = feed.active().next();
                        feed.switch_tab(next, selected);
                        self.selected = 0;
                        self.list_state = ListState::default();
                        self.status_message = format!("{} feed", next.label());
                        Action::None
                    }
                    KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => match item {
                        Some(item) => Action::Open(Route::Thread(item.id)),
                        None => Action::None,
                    },
                    KeyCode::Char('f') => {
                        if let Some(item) = item {
                            feed.toggle_like(&item.id)?;
                        }
                        Action::None
                    }
                    KeyCode::Char('x') => {
                        if let Some(item) = item {
                            feed.delete_review(&item.id)?;
                            self.status_message = "Deleting review…".to_string();
                        }
                        Action::None
                    }
                    KeyCode::Char('a') => match item {
                        Some(item) => Action::Open(author_route(&item)),
                        None => Action::None,
                    },
                    KeyCode::Char('r') => {
                        feed.refresh();
                        self.selected = 0;
                        self.list_state = ListState::default();
                        Action::None
                    }
                    KeyCode::Char('R') => {
                        if !feed.resume() {
                            self.status_message = "Nothing to retry.".to_string();
                        }
                        Action::None
                    }
                    KeyCode::Char('g') => {
                        feed.load_recommendations(true);
                        Action::None
                    }
                    KeyCode::Char('u') => own_profile.map_or(Action::None, Action::Open),
                    KeyCode::Char('m') => Action::Open(Route::Media),
                    KeyCode::Char('L') => Action::Logout,
                    _ => Action::None,
                }
            }
            View::Thread { controller, .. } => {
                let row = selected_comment(controller, selected);
                match code {
                    KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('l') | KeyCode::Right => {
                        if let Some((id, _)) = &row {
                            controller.toggle_expand(id);
                        }
                        Action::None
                    }
                    KeyCode::Char('c') => Action::Compose(Compose::new(ComposeTarget::Comment {
                        parent: None,
                    })),
                    KeyCode::Char('r') => match row {
                        Some((id, SendState::Confirmed)) => {
                            Action::Compose(Compose::new(ComposeTarget::Comment {
                                parent: Some(id),
                            }))
                        }
                        Some(_) => {
                            self.status_message =
                                "Wait for this comment to be posted before replying.".to_string();
                            Action::None
                        }
                        None => Action::Compose(Compose::new(ComposeTarget::Comment {
                            parent: None,
                        })),
                    },
                    KeyCode::Char('e') => match row {
                        Some((id, SendState::Confirmed)) => {
                            let text = controller
                                .tree()
                                .get(&id)
                                .map(|comment| comment.content.clone())
                                .unwrap_or_default();
                            Action::Compose(Compose::with_text(
                                ComposeTarget::Edit { comment_id: id },
                                text,
                            ))
                        }
                        _ => Action::None,
                    },
                    KeyCode::Char('x') => {
                        if let Some((id, SendState::Confirmed)) = row {
                            controller.delete_comment(&id)?;
                            self.status_message = "Deleting comment…".to_string();
                        }
                        Action::None
                    }
                    KeyCode::Char('R') => {
                        if let Some((id, SendState::Failed)) = row {
                            controller.retry_comment(&id);
                        }
                        Action::None
                    }
                    KeyCode::Char('X') => match row {
                        Some((id, SendState::Failed)) => {
                            let parent = controller.tree().parent_of(&id).map(str::to_string);
                            match controller.discard_comment(&id) {
                                Some(draft) => Action::Compose(Compose::with_text(
                                    ComposeTarget::Comment { parent },
                                    draft,
                                )),
                                None => Action::None,
                            }
                        }
                        _ => Action::None,
                    },
                    KeyCode::Char('a') => {
                        match row.and_then(|(id, _)| controller.tree().get(&id).cloned()) {
                            Some(comment) => Action::Open(Route::Profile {
                                name: comment.author_label().to_string(),
                                id: comment.profile_id,
                            }),
                            None => Action::None,
                        }
                    }
                    KeyCode::Char('g') => {
                        controller.load_top_level();
                        Action::None
                    }
                    _ => Action::None,
                }
            }
            View::Profile(profile) => {
                let review = profile.reviews().get(selected).cloned();
                match code {
                    KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => match review {
                        Some(review) => Action::Open(Route::Thread(review.id)),
                        None => Action::None,
                    },
                    KeyCode::Char('f') => {
                        profile.toggle_follow()?;
                        Action::None
                    }
                    KeyCode::Char('x') => {
                        if let Some(review) = review {
                            profile.delete_review(&review.id)?;
                        }
                        Action::None
                    }
                    KeyCode::Char('r') => {
                        profile.load();
                        Action::None
                    }
                    KeyCode::Char('m') => Action::Open(Route::Media),
                    _ => Action::None,
                }
            }
            View::Media {
                browser,
                editing_search,
            } => {
                let media = browser.items().get(selected).cloned();
                match code {
                    KeyCode::Char('/') => {
                        *editing_search = true;
                        Action::None
                    }
                    KeyCode::Tab | KeyCode::BackTab => {
                        browser.set_media_type(next_media_type(browser.media_type()));
                        self.selected = 0;
                        self.list_state = ListState::default();
                        Action::None
                    }
                    KeyCode::Char('s') => {
                        let filters = browser.filters().clone();
                        let sort = next_sort(&filters.sort_by);
                        browser.set_filters(&filters.year, &filters.genre, sort);
                        self.selected = 0;
                        self.list_state = ListState::default();
                        self.status_message = format!("Sorted by {}", sort_label(sort));
                        Action::None
                    }
                    KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => {
                        if let Some(media) = media {
                            browser.load_review_info(&media.id);
                        }
                        Action::None
                    }
                    KeyCode::Char('w') => match media {
                        Some(media) => Action::Compose(Compose::new(ComposeTarget::Review {
                            media,
                            rating: 3,
                        })),
                        None => Action::None,
                    },
                    KeyCode::Char('R') => {
                        browser.resume();
                        Action::None
                    }
                    _ => Action::None,
                }
            }
        };
        Ok(action)
    }

    fn handle_compose_key(&mut self, code: KeyCode) -> Result<()> {
        let Some(compose) = self.compose.as_mut() else {
            return Ok(());
        };
        match code {
            KeyCode::Esc => self.compose = None,
            KeyCode::Enter => self.submit_compose(),
            KeyCode::Backspace => {
                compose.text.pop();
            }
            KeyCode::Up | KeyCode::Down => {
                if let ComposeTarget::Review { rating, .. } = &mut compose.target {
                    *rating = if code == KeyCode::Up {
                        (*rating + 1).min(5)
                    } else {
                        rating.saturating_sub(1).max(1)
                    };
                }
            }
            KeyCode::Char(ch) => compose.text.push(ch),
            _ => {}
        }
        Ok(())
    }

    fn submit_compose(&mut self) {
        let Some(compose) = self.compose.take() else {
            return;
        };
        let result = match (&compose.target, &mut self.view) {
            (ComposeTarget::Comment { parent }, View::Thread { controller, .. }) => controller
                .add_comment(&compose.text, parent.as_deref())
                .map(|_| "Posting comment…"),
            (ComposeTarget::Edit { comment_id }, View::Thread { controller, .. }) => controller
                .edit_comment(comment_id, &compose.text)
                .map(|_| "Saving comment…"),
            (ComposeTarget::Review { media, rating }, View::Media { browser, .. }) => browser
                .submit_review(media, &compose.text, *rating)
                .map(|_| "Posting review…"),
            _ => Ok("Nothing to send from this view."),
        };
        match result {
            Ok(message) => self.status_message = message.to_string(),
            Err(err) => {
                self.status_message = format!("Error: {err:#}");
                self.compose = Some(compose);
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let palette = self.palette;
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(palette.bg)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let (status_text, status_color) = match self.view_error() {
            Some(err) => (err.to_string(), palette.error),
            None if self.is_loading() => (
                format!("{} {}", self.spinner.frame(), self.status_message)
                    .trim()
                    .to_string(),
                palette.text_primary,
            ),
            None => (self.status_message.clone(), palette.text_primary),
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(status_color)
                .bg(palette.panel_focused_bg)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        match self.view {
            View::Login(_) => self.draw_login(frame, layout[1]),
            View::Home(_) => self.draw_home(frame, layout[1]),
            View::Thread { .. } => self.draw_thread(frame, layout[1]),
            View::Profile(_) => self.draw_profile(frame, layout[1]),
            View::Media { .. } => self.draw_media(frame, layout[1]),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(palette.text_secondary)
                    .bg(palette.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.compose.is_some() {
            self.draw_compose(frame, layout[1]);
        }
    }

    /// Renders the view's main list and records what is needed for deferred
    /// scrolling and the end-of-list trigger.
    fn render_list(
        &mut self,
        frame: &mut Frame<'_>,
        area: Rect,
        items: Vec<ListItem<'static>>,
        empty: &str,
    ) {
        let palette = self.palette;
        self.rendered_rows = items.len();
        if items.is_empty() {
            self.last_item_visible = false;
            let placeholder = Paragraph::new(empty.to_string())
                .style(Style::default().fg(palette.text_secondary))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            frame.render_widget(placeholder, area);
            return;
        }
        let heights: Vec<usize> = items.iter().map(ListItem::height).collect();
        self.selected = self.selected.min(items.len() - 1);
        self.list_state.select(Some(self.selected));
        let list = List::new(items)
            .highlight_style(Style::default().bg(palette.selected_bg))
            .highlight_symbol(HIGHLIGHT_SYMBOL);
        frame.render_stateful_widget(list, area, &mut self.list_state);
        let offset = self.list_state.offset().min(heights.len());
        let remaining: usize = heights[offset..].iter().sum();
        self.last_item_visible = remaining <= area.height as usize;
    }

    fn draw_login(&self, frame: &mut Frame<'_>, area: Rect) {
        let View::Login(form) = &self.view else {
            return;
        };
        let palette = self.palette;
        let popup = centered_rect(50, 50, area);
        frame.render_widget(Clear, popup);
        let block = pane_block(palette, "Sign in to PopLens", true);
        let field_style = |field: LoginField| {
            if form.field == field {
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(palette.text_secondary)
            }
        };
        let cursor = |field: LoginField| if form.field == field { "▏" } else { "" };
        let masked = "•".repeat(form.password.chars().count());
        let mut lines = vec![
            Line::from(vec![
                Span::styled("Username  ", field_style(LoginField::Username)),
                Span::styled(
                    format!("{}{}", form.username, cursor(LoginField::Username)),
                    Style::default().fg(palette.text_primary),
                ),
            ]),
            Line::from(""),
            Line::from(vec![
                Span::styled("Password  ", field_style(LoginField::Password)),
                Span::styled(
                    format!("{masked}{}", cursor(LoginField::Password)),
                    Style::default().fg(palette.text_primary),
                ),
            ]),
            Line::from(""),
        ];
        if !form.status.is_empty() {
            let color = if form.pending {
                palette.text_secondary
            } else {
                palette.error
            };
            lines.push(Line::from(Span::styled(
                form.status.clone(),
                Style::default().fg(color),
            )));
        }
        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, popup);
    }

    fn draw_home(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let palette = self.palette;
        let View::Home(feed) = &self.view else {
            return;
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
            .split(area);

        let block = pane_block(palette, "Reviews", true);
        let inner = block.inner(columns[0]);
        frame.render_widget(block, columns[0]);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Min(0)])
            .split(inner);

        let active = FeedKind::ALL
            .iter()
            .position(|kind| *kind == feed.active())
            .unwrap_or(0);
        let tabs = Tabs::new(FeedKind::ALL.iter().map(|kind| kind.label()))
            .select(active)
            .style(Style::default().fg(palette.text_secondary))
            .highlight_style(
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            )
            .divider(" | ");
        frame.render_widget(tabs, rows[0]);

        let width = list_text_width(rows[1]);
        let now = Utc::now();
        let items: Vec<ListItem<'static>> = feed
            .items()
            .iter()
            .map(|item| ListItem::new(review_lines(item, width, palette, now)))
            .collect();
        let empty = if feed.is_loading() {
            "Loading reviews…"
        } else if feed.last_error().is_some() {
            "This feed stopped loading. Press R to retry."
        } else if feed.active() == FeedKind::Following {
            "No reviews from people you follow yet."
        } else {
            "No recommendations yet."
        };
        let sidebar = recommendation_lines(
            |media_type| feed.recommendations(media_type).to_vec(),
            feed.recommendations_loading(),
            palette,
        );

        let side_block = pane_block(palette, "Recommended", false);
        let sidebar = Paragraph::new(Text::from(sidebar))
            .block(side_block)
            .wrap(Wrap { trim: true });
        frame.render_widget(sidebar, columns[1]);

        self.render_list(frame, rows[1], items, empty);
    }

    fn draw_thread(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let palette = self.palette;
        let View::Thread { controller, .. } = &self.view else {
            return;
        };
        let own_id = self.session.viewer().map(|viewer| viewer.profile_id);
        let now = Utc::now();
        let header_width = area.width.saturating_sub(4).max(1) as usize;
        let header = match controller.review() {
            Some(review) => review_header_lines(review, header_width, palette, now),
            None => vec![Line::from(Span::styled(
                "Loading review…",
                Style::default().fg(palette.text_secondary),
            ))],
        };
        let header_height = (header.len() as u16 + 2).min(area.height / 2).max(3);
        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(header_height), Constraint::Min(0)])
            .split(area);
        let header = Paragraph::new(Text::from(header))
            .block(pane_block(palette, "Review", false))
            .wrap(Wrap { trim: false });
        frame.render_widget(header, sections[0]);

        let title = format!("Comments ({})", controller.tree().len());
        let block = pane_block(palette, &title, true);
        let inner = block.inner(sections[1]);
        frame.render_widget(block, sections[1]);
        let width = list_text_width(inner);
        let items: Vec<ListItem<'static>> = controller
            .tree()
            .visible_rows()
            .iter()
            .map(|row| {
                let own = own_id.as_deref() == Some(row.comment.profile_id.as_str());
                ListItem::new(comment_lines(row, width, palette, now, own))
            })
            .collect();
        let empty = if controller.is_loading() {
            "Loading comments…"
        } else {
            "No comments yet. Press c to start the conversation."
        };
        self.render_list(frame, inner, items, empty);
    }

    fn draw_profile(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let palette = self.palette;
        let View::Profile(profile) = &self.view else {
            return;
        };
        let name = match self.nav.current() {
            Route::Profile { name, .. } => name.clone(),
            _ => profile.profile_id().to_string(),
        };
        let mut header = vec![Line::from(Span::styled(
            name,
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ))];
        if let Some(data) = profile.profile() {
            let relation = if profile.is_own() {
                "(you)"
            } else if profile.is_following() {
                "[Following]"
            } else {
                "[Not following]"
            };
            header.push(Line::from(Span::styled(
                format!(
                    "{} reviews · {} followers · {} following · {relation}",
                    data.detailed_reviews.len(),
                    data.followers.len(),
                    data.following.len()
                ),
                Style::default().fg(palette.text_secondary),
            )));
        }
        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0)])
            .split(area);
        let header = Paragraph::new(Text::from(header))
            .block(pane_block(palette, "Profile", false))
            .wrap(Wrap { trim: true });
        frame.render_widget(header, sections[0]);

        let block = pane_block(palette, "Reviews", true);
        let inner = block.inner(sections[1]);
        frame.render_widget(block, sections[1]);
        let width = list_text_width(inner);
        let now = Utc::now();
        let items: Vec<ListItem<'static>> = profile
            .reviews()
            .iter()
            .map(|review| ListItem::new(review_lines(review, width, palette, now)))
            .collect();
        let empty = if profile.is_loading() {
            "Loading profile…"
        } else {
            "No reviews yet."
        };
        self.render_list(frame, inner, items, empty);
    }

    fn draw_media(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let palette = self.palette;
        let View::Media {
            browser,
            editing_search,
        } = &self.view
        else {
            return;
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
            .split(area);
        let block = pane_block(palette, "Browse", true);
        let inner = block.inner(columns[0]);
        frame.render_widget(block, columns[0]);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(2),
                Constraint::Min(0),
            ])
            .split(inner);

        let active = MediaType::ALL
            .iter()
            .position(|media_type| *media_type == browser.media_type())
            .unwrap_or(0);
        let tabs = Tabs::new(
            MediaType::ALL
                .iter()
                .map(|media_type| media_type.display_name()),
        )
        .select(active)
        .style(Style::default().fg(palette.text_secondary))
        .highlight_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )
        .divider(" | ");
        frame.render_widget(tabs, rows[0]);

        let search_style = if *editing_search {
            Style::default().fg(palette.accent)
        } else {
            Style::default().fg(palette.text_secondary)
        };
        let cursor = if *editing_search { "▏" } else { "" };
        let search = Paragraph::new(Line::from(vec![
            Span::styled("Search: ", search_style),
            Span::styled(
                format!("{}{cursor}", browser.draft_query()),
                Style::default().fg(palette.text_primary),
            ),
            Span::styled(
                format!("   sort: {}", sort_label(&browser.filters().sort_by)),
                Style::default().fg(palette.text_secondary),
            ),
        ]));
        frame.render_widget(search, rows[1]);

        let width = list_text_width(rows[2]);
        let items: Vec<ListItem<'static>> = browser
            .items()
            .iter()
            .map(|media| ListItem::new(media_lines(media, width, palette)))
            .collect();
        let empty = if browser.is_loading() {
            "Loading titles…"
        } else if media::is_searchable(&browser.filters().query) {
            "No titles match this search."
        } else {
            "No titles found."
        };

        let selected_id = browser.items().get(self.selected).map(|media| media.id.clone());
        let mut side: Vec<Line<'static>> = Vec::new();
        let results = browser.search_results();
        if media::is_searchable(&browser.filters().query) {
            side.push(section_title("People", palette));
            if results.users.is_empty() {
                side.push(dim_line("  nobody found", palette));
            }
            for user in &results.users {
                side.push(Line::from(format!("  @{}", user.username)));
            }
            side.push(Line::from(""));
            side.push(section_title("Titles", palette));
            for found in &results.media {
                side.push(Line::from(format!(
                    "  {} ({})",
                    found.title,
                    found.media_type.display_name()
                )));
            }
            side.push(Line::from(""));
        }
        if let Some(info) = selected_id.as_deref().and_then(|id| browser.review_info(id)) {
            side.push(section_title("Ratings", palette));
            let mut buckets: Vec<_> = info.rating_chart_info.iter().collect();
            buckets.sort_by(|a, b| b.0.cmp(a.0));
            for (bucket, count) in buckets {
                side.push(Line::from(format!("  {bucket}★ {}", "█".repeat(*count as usize))));
            }
            side.push(Line::from(""));
            side.push(section_title("Recent reviews", palette));
            for review in info.recent_reviews.iter().take(5) {
                let author = review.username.as_deref().unwrap_or("someone");
                side.push(Line::from(format!("  {author}: {}", truncate(&review.content, 60))));
            }
        } else if side.is_empty() {
            side.push(dim_line(
                "Press Enter on a title to see its ratings.",
                palette,
            ));
        }
        let side = Paragraph::new(Text::from(side))
            .block(pane_block(palette, "Details", false))
            .wrap(Wrap { trim: true });
        frame.render_widget(side, columns[1]);

        self.render_list(frame, rows[2], items, empty);
    }

    fn draw_compose(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(compose) = self.compose.as_ref() else {
            return;
        };
        let palette = self.palette;
        let popup = centered_rect(60, 40, area);
        frame.render_widget(Clear, popup);
        let mut lines = Vec::new();
        if let ComposeTarget::Review { rating, .. } = &compose.target {
            lines.push(Line::from(vec![
                Span::styled("Rating ", Style::default().fg(palette.text_secondary)),
                Span::styled(
                    stars(f32::from(*rating)),
                    Style::default().fg(palette.accent),
                ),
                Span::styled("  (↑/↓)", Style::default().fg(palette.text_secondary)),
            ]));
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            format!("{}▏", compose.text),
            Style::default().fg(palette.text_primary),
        )));
        let paragraph = Paragraph::new(Text::from(lines))
            .block(pane_block(palette, &compose.title(), true))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, popup);
    }

    fn footer_text(&self) -> String {
        if self.compose.is_some() {
            return "Compose: type your text · Enter send · Esc cancel".to_string();
        }
        let parts: &[&str] = match &self.view {
            View::Login(_) => &["Tab switch field", "Enter sign in", "Esc quit"],
            View::Home(_) => &[
                "j/k move",
                "Enter open",
                "Tab switch feed",
                "f like",
                "a author",
                "u my profile",
                "m browse",
                "r refresh",
                "L sign out",
                "q quit",
            ],
            View::Thread { .. } => &[
                "j/k move",
                "Enter expand",
                "c comment",
                "r reply",
                "e edit",
                "x delete",
                "R retry",
                "X discard",
                "Esc back",
            ],
            View::Profile(_) => &[
                "j/k move",
                "Enter open",
                "f follow",
                "x delete",
                "r reload",
                "Esc back",
            ],
            View::Media {
                editing_search: true,
                ..
            } => &["Type to search", "Enter/Esc done"],
            View::Media { .. } => &[
                "j/k move",
                "/ search",
                "Tab type",
                "s sort",
                "Enter ratings",
                "w write review",
                "Esc back",
            ],
        };
        parts.join(" · ")
    }
}

fn author_route(item: &FeedItem) -> Route {
    Route::Profile {
        id: item.profile_id.clone(),
        name: item.author_label().to_string(),
    }
}

/// Id and delivery state of the comment on the selected row.
fn selected_comment(controller: &ThreadController, selected: usize) -> Option<(String, SendState)> {
    controller
        .tree()
        .visible_rows()
        .get(selected)
        .map(|row| (row.comment.id.clone(), row.send))
}

fn next_media_type(current: MediaType) -> MediaType {
    let index = MediaType::ALL
        .iter()
        .position(|media_type| *media_type == current)
        .unwrap_or(0);
    MediaType::ALL[(index + 1) % MediaType::ALL.len()]
}

fn next_sort(current: &str) -> &'static str {
    let index = SORT_ORDERS
        .iter()
        .position(|sort| *sort == current)
        .unwrap_or(0);
    SORT_ORDERS[(index + 1) % SORT_ORDERS.len()]
}

fn sort_label(sort: &str) -> &'static str {
    match sort {
        "title" => "title",
        "newest" => "newest",
        "rating" => "rating",
        _ => "relevance",
    }
}

fn pane_block(palette: Palette, title: &str, focused: bool) -> Block<'static> {
    let title_style = if focused {
        Style::default()
            .fg(palette.accent)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(palette.text_secondary)
    };
    let border_style = if focused {
        Style::default().fg(palette.border)
    } else {
        Style::default().fg(palette.text_secondary)
    };
    Block::default()
        .title(Span::styled(title.to_string(), title_style))
        .borders(Borders::ALL)
        .border_style(border_style)
        .style(Style::default().bg(palette.panel_bg))
        .padding(Padding::horizontal(1))
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn list_text_width(area: Rect) -> usize {
    (area.width as usize)
        .saturating_sub(UnicodeWidthStr::width(HIGHLIGHT_SYMBOL))
        .max(1)
}

fn section_title(title: &str, palette: Palette) -> Line<'static> {
    Line::from(Span::styled(
        title.to_string(),
        Style::default()
            .fg(palette.accent)
            .add_modifier(Modifier::BOLD),
    ))
}

fn dim_line(text: &str, palette: Palette) -> Line<'static> {
    Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(palette.text_secondary),
    ))
}

fn recommendation_lines(
    picks: impl Fn(MediaType) -> Vec<Media>,
    loading: bool,
    palette: Palette,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for media_type in MediaType::ALL {
        lines.push(section_title(media_type.display_name(), palette));
        let media = picks(media_type);
        if media.is_empty() {
            let note = if loading { "  loading…" } else { "  nothing yet" };
            lines.push(dim_line(note, palette));
        }
        for item in media.iter().take(5) {
            lines.push(Line::from(format!("  {}", item.title)));
            if !item.creator().is_empty() {
                lines.push(dim_line(&format!("    {}", item.creator()), palette));
            }
        }
        lines.push(Line::from(""));
    }
    lines
}

fn stars(rating: f32) -> String {
    let filled = rating.round().clamp(0.0, 5.0) as usize;
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn relative_time(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else {
        return String::new();
    };
    let elapsed = now.signed_duration_since(created);
    if elapsed.num_seconds() < 60 {
        "just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed.num_days() < 30 {
        format!("{}d ago", elapsed.num_days())
    } else {
        created.format("%Y-%m-%d").to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }

    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let wrap_width = width.max(min_width);
    let options = WrapOptions::new(wrap_width)
        .break_words(true)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn wrap_with_prefix(text: &str, width: usize, prefix: &str, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefixes(text, width, prefix, prefix, style)
}

fn review_header_lines(
    review: &FeedItem,
    width: usize,
    palette: Palette,
    now: DateTime<Utc>,
) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![
        Span::styled(
            review.media_title.clone(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "  {} · {}",
                review.media_kind().display_name(),
                review.media_creator
            ),
            Style::default().fg(palette.text_secondary),
        ),
    ])];
    lines.push(Line::from(Span::styled(
        format!(
            "{} by {} · {}",
            stars(review.rating),
            review.author_label(),
            relative_time(review.created_at(), now)
        ),
        Style::default().fg(palette.text_secondary),
    )));
    for paragraph in review.content.lines() {
        lines.extend(wrap_plain(
            paragraph,
            width,
            Style::default().fg(palette.text_primary),
        ));
    }
    lines
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefixes(text, width, "", "", style)
}

fn review_lines(
    review: &FeedItem,
    width: usize,
    palette: Palette,
    now: DateTime<Utc>,
) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![
        Span::styled(
            review.author_label().to_string(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                " on {} ({}) ",
                review.media_title,
                review.media_kind().display_name()
            ),
            Style::default().fg(palette.text_primary),
        ),
        Span::styled(stars(review.rating), Style::default().fg(palette.success)),
    ])];

    let body_style = Style::default().fg(palette.text_primary);
    let mut body = wrap_with_prefix(review.content.trim(), width, "  ", body_style);
    if body.len() > REVIEW_PREVIEW_LINES {
        body.truncate(REVIEW_PREVIEW_LINES);
        body.push(Line::from(Span::styled("  …", body_style)));
    }
    lines.extend(body);

    let heart = if review.liked_by_me { "♥" } else { "♡" };
    let comments = if review.comment_count == 1 {
        "comment"
    } else {
        "comments"
    };
    lines.push(Line::from(Span::styled(
        format!(
            "  {heart} {} · {} {comments} · {}",
            review.like_count,
            review.comment_count,
            relative_time(review.created_at(), now)
        ),
        Style::default().fg(palette.text_secondary),
    )));
    lines.push(Line::from(""));
    lines
}

fn media_lines(media: &Media, width: usize, palette: Palette) -> Vec<Line<'static>> {
    let year: String = media.publish_date.chars().take(4).collect();
    let mut title = media.title.clone();
    if !year.is_empty() {
        title.push_str(&format!(" ({year})"));
    }
    let mut lines = vec![Line::from(Span::styled(
        title,
        Style::default()
            .fg(palette.text_primary)
            .add_modifier(Modifier::BOLD),
    ))];
    let mut meta = Vec::new();
    if !media.creator().is_empty() {
        meta.push(media.creator().to_string());
    }
    if !media.genre.is_empty() {
        meta.push(media.genre.clone());
    }
    meta.push(format!(
        "{:.1}★ from {} reviews",
        media.avg_rating, media.total_reviews
    ));
    lines.extend(wrap_with_prefix(
        &meta.join(" · "),
        width,
        "  ",
        Style::default().fg(palette.text_secondary),
    ));
    if let Some(url) = media::cover_image_url(media) {
        lines.push(Line::from(Span::styled(
            format!("  {}", truncate(&url, width.saturating_sub(2).max(8))),
            Style::default()
                .fg(palette.text_secondary)
                .add_modifier(Modifier::DIM),
        )));
    }
    lines.push(Line::from(""));
    lines
}

fn comment_lines(
    row: &Row<'_>,
    width: usize,
    palette: Palette,
    now: DateTime<Utc>,
    own: bool,
) -> Vec<Line<'static>> {
    let indent_units = "  ".repeat(row.depth);
    let indicator = if row.reply_count == 0 {
        " · "
    } else if row.expanded {
        "[-]"
    } else {
        "[+]"
    };
    let indicator_prefix = format!("{indent_units}{indicator} ");
    let spacer = " ".repeat(indicator.chars().count());
    let rest_prefix = format!("{indent_units}{spacer} ");
    let body_prefix = format!("{indent_units}{spacer}  ");

    let mut header = row.comment.author_label().to_string();
    if own {
        header.push_str(" (you)");
    }
    let when = relative_time(row.comment.created_at(), now);
    if !when.is_empty() {
        header.push_str(&format!(" · {when}"));
    }
    if row.reply_count > 0 {
        let noun = if row.reply_count == 1 {
            "reply"
        } else {
            "replies"
        };
        header.push_str(&format!(" · {} {noun}", row.reply_count));
    }
    if row.loading {
        header.push_str(" · loading replies…");
    }

    let mut meta_style = Style::default().fg(palette.depth(row.depth));
    match row.send {
        SendState::Confirmed => {}
        SendState::Sending => {
            header.push_str(" · sending…");
            meta_style = meta_style.add_modifier(Modifier::ITALIC);
        }
        SendState::Failed => {
            header.push_str(" · not sent (R retry, X discard)");
            meta_style = Style::default().fg(palette.error);
        }
    }

    let mut lines = wrap_with_prefixes(
        &header,
        width,
        indicator_prefix.as_str(),
        rest_prefix.as_str(),
        meta_style,
    );
    let body_style = Style::default().fg(palette.text_primary);
    for raw_line in row.comment.content.lines() {
        if raw_line.trim().is_empty() {
            lines.push(Line::from(Span::styled(String::new(), body_style)));
            continue;
        }
        lines.extend(wrap_with_prefix(
            raw_line.trim(),
            width,
            body_prefix.as_str(),
            body_style,
        ));
    }
    lines.push(Line::from(""));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::config::MediaConfig;
    use crate::data::{FixtureMediaService, Fixtures, ReviewService};
    use crate::model::{Comment, CreateReviewRequest, CreatedReview, ReviewDetail};
    use crate::session::Viewer;
    use crate::task::poll_until;

    fn line_text(line: &Line<'_>) -> String {
        line.spans
            .iter()
            .map(|span| span.content.as_ref())
            .collect()
    }

    struct RejectingReviews;

    impl ReviewService for RejectingReviews {
        fn review_detail(&self, _: &str) -> Result<ReviewDetail> {
            anyhow::bail!("unsupported")
        }
        fn add_review(&self, _: &str, _: &CreateReviewRequest) -> Result<CreatedReview> {
            anyhow::bail!("gateway timeout")
        }
        fn delete_review(&self, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("unsupported")
        }
        fn like(&self, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("unsupported")
        }
        fn unlike(&self, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("unsupported")
        }
    }

    #[test]
    fn failed_review_reopens_compose_with_its_text() {
        let fixtures = Fixtures::demo();
        let mut browser = MediaBrowser::new(
            Arc::new(FixtureMediaService::new(fixtures)),
            Arc::new(RejectingReviews),
            Some(Viewer {
                profile_id: "profile-ana".into(),
                username: "ana".into(),
            }),
            &MediaConfig::default(),
            &Bus::new(),
        );
        let media = Media {
            id: "m-heat".into(),
            title: "Heat".into(),
            ..Media::default()
        };
        browser.submit_review(&media, "Great heist film", 4).unwrap();
        poll_until(&mut browser, MediaBrowser::poll, |b| !b.is_posting());

        let mut busy = Some(Compose::new(ComposeTarget::Comment { parent: None }));
        assert!(!reopen_failed_review(&mut busy, &mut browser));

        let mut compose = None;
        assert!(reopen_failed_review(&mut compose, &mut browser));
        assert_eq!(
            compose,
            Some(Compose::with_text(
                ComposeTarget::Review { media, rating: 4 },
                "Great heist film",
            ))
        );
        assert!(!reopen_failed_review(&mut None, &mut browser));
    }

    #[test]
    fn stars_round_and_clamp() {
        assert_eq!(stars(4.4), "★★★★☆");
        assert_eq!(stars(4.5), "★★★★★");
        assert_eq!(stars(9.0), "★★★★★");
        assert_eq!(stars(-1.0), "☆☆☆☆☆");
    }

    #[test]
    fn relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(Some(now), now), "just now");
        assert_eq!(
            relative_time(Some(now - ChronoDuration::minutes(5)), now),
            "5m ago"
        );
        assert_eq!(
            relative_time(Some(now - ChronoDuration::hours(3)), now),
            "3h ago"
        );
        assert_eq!(
            relative_time(Some(now - ChronoDuration::days(2)), now),
            "2d ago"
        );
        assert_eq!(relative_time(None, now), "");
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn comment_lines_indent_by_depth_and_flag_failures() {
        let comment = Comment {
            id: "tmp-1".into(),
            review_id: "r".into(),
            parent_comment_id: Some("c-1".into()),
            profile_id: "p".into(),
            username: Some("ana".into()),
            content: "hello there".into(),
            created_date: String::new(),
            last_updated_date: String::new(),
            reply_count: None,
            detailed_replies: None,
        };
        let row = Row {
            comment: &comment,
            depth: 2,
            reply_count: 0,
            expanded: false,
            loading: false,
            send: SendState::Failed,
        };
        let lines = comment_lines(&row, 60, Palette::DEFAULT, Utc::now(), true);
        let header = line_text(&lines[0]);
        // two levels of indent, then the leaf marker
        let expected = format!("{}·  ana (you)", " ".repeat(5));
        assert!(header.starts_with(&expected), "header was {header:?}");
        assert!(header.contains("not sent"));
        let body = line_text(&lines[1]);
        assert!(
            body.starts_with(&format!("{}hello", " ".repeat(9))),
            "body was {body:?}"
        );
    }

    #[test]
    fn review_preview_is_capped() {
        let review = FeedItem {
            username: Some("ben".into()),
            media_title: "Dune".into(),
            content: "word ".repeat(200),
            like_count: 3,
            comment_count: 1,
            ..FeedItem::default()
        };
        let lines = review_lines(&review, 30, Palette::DEFAULT, Utc::now());
        // header + capped body + ellipsis + meta + spacer
        assert_eq!(lines.len(), 1 + REVIEW_PREVIEW_LINES + 1 + 2);
        assert!(line_text(&lines[lines.len() - 2]).contains("3 · 1 comment"));
    }

    #[test]
    fn cycles_wrap_around() {
        assert_eq!(next_media_type(MediaType::Game), MediaType::ALL[0]);
        assert_eq!(next_sort("rating"), "");
        assert_eq!(sort_label(next_sort("")), "title");
    }

    #[test]
    fn restore_as_only_accepts_matching_state() {
        let capsule = Capsule {
            state: ViewState::Profile(ProfileState::default()),
            scroll_offset: 3,
        };
        let home = restore_as(Activation::Restore(capsule.clone()), |state| match state {
            ViewState::Home(state) => Some(state),
            _ => None,
        });
        assert!(home.is_none());
        let profile = restore_as(Activation::Restore(capsule), |state| match state {
            ViewState::Profile(state) => Some(state),
            _ => None,
        })
        .unwrap();
        assert_eq!(profile.scroll_offset, 3);
    }

    #[test]
    fn palette_falls_back_to_default() {
        assert_eq!(Palette::named("mono"), Palette::MONO);
        assert_eq!(Palette::named("something"), Palette::DEFAULT);
    }
}
