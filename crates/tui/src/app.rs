use nextop_core::dashboard::{ConnectionDraft, Intent, Outcome, RenderFrame};
use nextop_core::instance::DbmsKind;
use nextop_core::view::ViewState;

use crate::keymap::{DirectionKey, InputMode, Msg};

const PAGE_STEP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormField {
    Dbms,
    Dsn,
    Name,
    Group,
}

impl FormField {
    pub(crate) const ALL: [Self; 4] = [Self::Dbms, Self::Dsn, Self::Name, Self::Group];

    fn next(self) -> Self {
        match self {
            Self::Dbms => Self::Dsn,
            Self::Dsn => Self::Name,
            Self::Name => Self::Group,
            Self::Group => Self::Dbms,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Dbms => Self::Group,
            Self::Dsn => Self::Dbms,
            Self::Name => Self::Dsn,
            Self::Group => Self::Name,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Dbms => "DBMS",
            Self::Dsn => "DSN",
            Self::Name => "Name",
            Self::Group => "Group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SetupForm {
    pub(crate) dbms: String,
    pub(crate) dsn: String,
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) active_field: FormField,
}

impl Default for SetupForm {
    fn default() -> Self {
        Self {
            dbms: DbmsKind::Mysql.as_str().to_string(),
            dsn: String::new(),
            name: String::new(),
            group: String::new(),
            active_field: FormField::Dsn,
        }
    }
}

impl SetupForm {
    pub(crate) fn value(&self, field: FormField) -> &str {
        match field {
            FormField::Dbms => &self.dbms,
            FormField::Dsn => &self.dsn,
            FormField::Name => &self.name,
            FormField::Group => &self.group,
        }
    }

    fn active_value_mut(&mut self) -> &mut String {
        match self.active_field {
            FormField::Dbms => &mut self.dbms,
            FormField::Dsn => &mut self.dsn,
            FormField::Name => &mut self.name,
            FormField::Group => &mut self.group,
        }
    }

    fn draft(&self) -> ConnectionDraft {
        ConnectionDraft {
            dbms: self.dbms.clone(),
            dsn: self.dsn.clone(),
            name: self.name.clone(),
            group: self.group.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub(crate) level: StatusLevel,
    pub(crate) text: String,
}

impl StatusLine {
    fn info(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            text: text.into(),
        }
    }
}

/// Input-side state the core does not own: form text, focus, filter and scroll.
#[derive(Debug)]
pub(crate) struct TuiApp {
    pub(crate) form: SetupForm,
    pub(crate) focused: Option<String>,
    pub(crate) filter: String,
    pub(crate) filter_editing: bool,
    pub(crate) scroll: usize,
    pub(crate) menu_cursor: usize,
    pub(crate) status: StatusLine,
    pub(crate) show_help: bool,
    pub(crate) should_quit: bool,
    pub(crate) pending: usize,
}

impl Default for TuiApp {
    fn default() -> Self {
        Self {
            form: SetupForm::default(),
            focused: None,
            filter: String::new(),
            filter_editing: false,
            scroll: 0,
            menu_cursor: 0,
            status: StatusLine::info("Enter a DSN and press Enter to connect"),
            show_help: false,
            should_quit: false,
            pending: 0,
        }
    }
}

impl TuiApp {
    pub(crate) fn with_notes(notes: &[String]) -> Self {
        let mut app = Self::default();
        if !notes.is_empty() {
            app.status = StatusLine {
                level: StatusLevel::Warning,
                text: notes.join(" | "),
            };
        }
        app
    }

    pub(crate) fn input_mode(&self, view: ViewState) -> InputMode {
        if self.filter_editing {
            InputMode::Filter
        } else if view == ViewState::ConnectionSetup {
            InputMode::Form
        } else {
            InputMode::Navigation
        }
    }

    /// Applies `msg` locally and returns the intent to dispatch, if any.
    pub(crate) fn handle(&mut self, msg: Msg, frame: &RenderFrame) -> Option<Intent> {
        let view = frame.view.current;
        match msg {
            Msg::Quit => Some(Intent::Quit),
            Msg::ToggleHelp => {
                self.show_help = !self.show_help;
                None
            }
            Msg::Submit => self.submit(view),
            Msg::NextField => {
                self.form.active_field = self.form.active_field.next();
                None
            }
            Msg::PreviousField => {
                self.form.active_field = self.form.active_field.previous();
                None
            }
            Msg::Input(ch) => {
                if self.filter_editing {
                    self.filter.push(ch);
                    self.scroll = 0;
                } else {
                    self.form.active_value_mut().push(ch);
                }
                None
            }
            Msg::Backspace => {
                if self.filter_editing {
                    self.filter.pop();
                    self.scroll = 0;
                } else {
                    self.form.active_value_mut().pop();
                }
                None
            }
            Msg::ReconnectAll => Some(Intent::ReconnectAll),
            Msg::OpenMenu => Some(Intent::SwitchView(ViewState::InstanceMenu)),
            Msg::OpenSetup => Some(Intent::OpenSetup),
            Msg::Back => {
                if self.filter_editing {
                    self.filter_editing = false;
                    self.filter.clear();
                    self.scroll = 0;
                    return None;
                }
                Some(Intent::GoBack)
            }
            Msg::SwitchView(target) => Some(Intent::SwitchView(target)),
            Msg::Navigate(direction) => {
                self.navigate(view, direction);
                None
            }
            Msg::CycleInstance => {
                self.cycle_instance(frame);
                None
            }
            Msg::StartFilter => {
                if matches!(view, ViewState::Processlist | ViewState::ErrorLog) {
                    self.filter_editing = true;
                } else {
                    self.status =
                        StatusLine::info("Filtering works in the processlist and error log views");
                }
                None
            }
            Msg::RemoveFocused => frame.focused.clone().map(Intent::RemoveInstance),
        }
    }

    pub(crate) fn apply_outcome(&mut self, outcome: Outcome) {
        self.pending = self.pending.saturating_sub(1);
        let level = match outcome {
            Outcome::Throttled => return,
            Outcome::Quit => {
                self.should_quit = true;
                return;
            }
            Outcome::Info(_) => StatusLevel::Info,
            Outcome::Warning(_) => StatusLevel::Warning,
            Outcome::Error(_) => StatusLevel::Error,
        };
        if let Some(text) = outcome.message() {
            self.status = StatusLine {
                level,
                text: text.to_string(),
            };
        }
    }

    /// Resets per-view state when the core reports a different view.
    pub(crate) fn on_view_changed(&mut self) {
        self.filter.clear();
        self.filter_editing = false;
        self.scroll = 0;
    }

    fn submit(&mut self, view: ViewState) -> Option<Intent> {
        if self.filter_editing {
            self.filter_editing = false;
            return None;
        }
        match view {
            ViewState::ConnectionSetup => Some(Intent::SubmitConnection(self.form.draft())),
            ViewState::InstanceMenu => ViewState::MENU
                .get(self.menu_cursor)
                .copied()
                .map(Intent::SwitchView),
            _ => None,
        }
    }

    fn navigate(&mut self, view: ViewState, direction: DirectionKey) {
        if view == ViewState::InstanceMenu {
            let last = ViewState::MENU.len() - 1;
            self.menu_cursor = match direction {
                DirectionKey::Up => self.menu_cursor.saturating_sub(1),
                DirectionKey::Down => (self.menu_cursor + 1).min(last),
                DirectionKey::PageUp => 0,
                DirectionKey::PageDown => last,
            };
            return;
        }
        self.scroll = match direction {
            DirectionKey::Up => self.scroll.saturating_sub(1),
            DirectionKey::Down => self.scroll.saturating_add(1),
            DirectionKey::PageUp => self.scroll.saturating_sub(PAGE_STEP),
            DirectionKey::PageDown => self.scroll.saturating_add(PAGE_STEP),
        };
    }

    fn cycle_instance(&mut self, frame: &RenderFrame) {
        if frame.instances.is_empty() {
            return;
        }
        let current = frame
            .focused
            .as_deref()
            .and_then(|name| frame.instances.iter().position(|entry| entry.name() == name));
        let next = current.map_or(0, |index| (index + 1) % frame.instances.len());
        let name = frame.instances[next].name().to_string();
        self.status = StatusLine::info(format!("Focused on {name}"));
        self.focused = Some(name);
        self.scroll = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use nextop_core::dashboard::{Intent, Outcome, RenderFrame};
    use nextop_core::instance::{DbmsKind, Dsn, Instance, InstanceStatus};
    use nextop_core::registry::InstanceEntry;
    use nextop_core::view::{ViewSnapshot, ViewState};

    use super::{FormField, StatusLevel, TuiApp};
    use crate::keymap::{DirectionKey, InputMode, Msg};

    pub(crate) fn entry(name: &str, status: InstanceStatus) -> InstanceEntry {
        InstanceEntry {
            instance: Instance::new(name, DbmsKind::Mysql, Dsn::new("root:pw@tcp(db:3306)/")),
            status,
            last_latency: None,
            online_since: None,
            last_error: None,
        }
    }

    pub(crate) fn frame(view: ViewState, names: &[&str]) -> RenderFrame {
        RenderFrame {
            view: ViewSnapshot {
                current: view,
                previous: None,
            },
            instances: names
                .iter()
                .map(|name| entry(name, InstanceStatus::Online))
                .collect(),
            focused: names.first().map(|name| (*name).to_string()),
            snapshots: Vec::new(),
            case_sensitive_filters: false,
        }
    }

    #[test]
    fn typing_fills_the_active_field_and_submits_a_draft() {
        let mut app = TuiApp::default();
        let setup = frame(ViewState::ConnectionSetup, &[]);
        assert_eq!(app.input_mode(ViewState::ConnectionSetup), InputMode::Form);

        for ch in "root@tcp(db:3306)/".chars() {
            app.handle(Msg::Input(ch), &setup);
        }
        app.handle(Msg::NextField, &setup);
        assert_eq!(app.form.active_field, FormField::Name);
        for ch in "prod".chars() {
            app.handle(Msg::Input(ch), &setup);
        }
        app.handle(Msg::Backspace, &setup);

        let Some(Intent::SubmitConnection(draft)) = app.handle(Msg::Submit, &setup) else {
            panic!("submit in setup should produce a connection draft");
        };
        assert_eq!(draft.dbms, "mysql");
        assert_eq!(draft.dsn, "root@tcp(db:3306)/");
        assert_eq!(draft.name, "pro");
        assert!(draft.group.is_empty());
    }

    #[test]
    fn field_cycling_wraps_both_ways() {
        let mut app = TuiApp::default();
        let setup = frame(ViewState::ConnectionSetup, &[]);
        app.handle(Msg::PreviousField, &setup);
        assert_eq!(app.form.active_field, FormField::Dbms);
        app.handle(Msg::PreviousField, &setup);
        assert_eq!(app.form.active_field, FormField::Group);
        app.handle(Msg::NextField, &setup);
        assert_eq!(app.form.active_field, FormField::Dbms);
    }

    #[test]
    fn menu_cursor_selects_the_view_to_open() {
        let mut app = TuiApp::default();
        let menu = frame(ViewState::InstanceMenu, &["prod"]);
        app.handle(Msg::Navigate(DirectionKey::Down), &menu);
        app.handle(Msg::Navigate(DirectionKey::Down), &menu);
        assert_eq!(
            app.handle(Msg::Submit, &menu),
            Some(Intent::SwitchView(ViewState::Locks))
        );

        app.handle(Msg::Navigate(DirectionKey::PageDown), &menu);
        assert_eq!(
            app.handle(Msg::Submit, &menu),
            Some(Intent::SwitchView(ViewState::ConnectionSetup))
        );
    }

    #[test]
    fn filter_editing_captures_text_and_escape_clears_it() {
        let mut app = TuiApp::default();
        let processlist = frame(ViewState::Processlist, &["prod"]);

        app.handle(Msg::StartFilter, &processlist);
        assert_eq!(app.input_mode(ViewState::Processlist), InputMode::Filter);
        app.handle(Msg::Input('q'), &processlist);
        assert_eq!(app.filter, "q");
        assert_eq!(app.handle(Msg::Submit, &processlist), None);
        assert_eq!(app.input_mode(ViewState::Processlist), InputMode::Navigation);
        assert_eq!(app.filter, "q");

        app.handle(Msg::StartFilter, &processlist);
        assert_eq!(app.handle(Msg::Back, &processlist), None);
        assert!(app.filter.is_empty());
        assert_eq!(app.handle(Msg::Back, &processlist), Some(Intent::GoBack));
    }

    #[test]
    fn filter_is_refused_outside_filterable_views() {
        let mut app = TuiApp::default();
        app.handle(Msg::StartFilter, &frame(ViewState::Memory, &["prod"]));
        assert!(!app.filter_editing);
    }

    #[test]
    fn tab_cycles_focus_through_instances() {
        let mut app = TuiApp::default();
        let mut dashboard = frame(ViewState::Dashboard, &["prod", "replica"]);

        app.handle(Msg::CycleInstance, &dashboard);
        assert_eq!(app.focused.as_deref(), Some("replica"));

        dashboard.focused = app.focused.clone();
        app.handle(Msg::CycleInstance, &dashboard);
        assert_eq!(app.focused.as_deref(), Some("prod"));
    }

    #[test]
    fn remove_targets_the_focused_instance() {
        let mut app = TuiApp::default();
        assert_eq!(
            app.handle(Msg::RemoveFocused, &frame(ViewState::InstanceMenu, &["prod"])),
            Some(Intent::RemoveInstance("prod".to_string()))
        );
        assert_eq!(
            app.handle(Msg::RemoveFocused, &frame(ViewState::InstanceMenu, &[])),
            None
        );
    }

    #[test]
    fn startup_notes_open_as_a_warning() {
        let app = TuiApp::with_notes(&[
            "Skipped invalid connection old".to_string(),
            "1 of 1 instance(s) offline".to_string(),
        ]);
        assert_eq!(app.status.level, StatusLevel::Warning);
        assert_eq!(
            app.status.text,
            "Skipped invalid connection old | 1 of 1 instance(s) offline"
        );
    }

    #[test]
    fn outcomes_update_the_status_line() {
        let mut app = TuiApp::default();
        app.pending = 2;
        app.apply_outcome(Outcome::Warning("No connection online".to_string()));
        assert_eq!(app.status.level, StatusLevel::Warning);
        assert_eq!(app.status.text, "No connection online");

        app.apply_outcome(Outcome::Throttled);
        assert_eq!(app.status.text, "No connection online");
        assert_eq!(app.pending, 0);

        app.apply_outcome(Outcome::Quit);
        assert!(app.should_quit);
    }
}
