use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use nextop_core::view::ViewState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectionKey {
    Up,
    Down,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Msg {
    Quit,
    ToggleHelp,
    Submit,
    NextField,
    PreviousField,
    Input(char),
    Backspace,
    ReconnectAll,
    OpenMenu,
    OpenSetup,
    Back,
    SwitchView(ViewState),
    Navigate(DirectionKey),
    CycleInstance,
    StartFilter,
    RemoveFocused,
}

/// Which keys are plain text right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputMode {
    Form,
    Filter,
    Navigation,
}

pub(crate) fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c' | 'q') => Some(Msg::Quit),
            KeyCode::Char('d') => Some(Msg::ReconnectAll),
            KeyCode::Char('o') => Some(Msg::OpenMenu),
            _ => None,
        };
    }

    match mode {
        InputMode::Form => map_form_key(key),
        InputMode::Filter => map_filter_key(key),
        InputMode::Navigation => map_navigation_key(key),
    }
}

fn map_form_key(key: KeyEvent) -> Option<Msg> {
    match key.code {
        KeyCode::Enter => Some(Msg::Submit),
        KeyCode::Tab | KeyCode::Down => Some(Msg::NextField),
        KeyCode::BackTab | KeyCode::Up => Some(Msg::PreviousField),
        KeyCode::Esc => Some(Msg::Back),
        KeyCode::Backspace => Some(Msg::Backspace),
        KeyCode::Char(ch) => Some(Msg::Input(ch)),
        _ => None,
    }
}

fn map_filter_key(key: KeyEvent) -> Option<Msg> {
    match key.code {
        KeyCode::Enter => Some(Msg::Submit),
        KeyCode::Esc => Some(Msg::Back),
        KeyCode::Backspace => Some(Msg::Backspace),
        KeyCode::Char(ch) => Some(Msg::Input(ch)),
        _ => None,
    }
}

fn map_navigation_key(key: KeyEvent) -> Option<Msg> {
    match key.code {
        KeyCode::Char('q') => Some(Msg::Quit),
        KeyCode::Char('?') => Some(Msg::ToggleHelp),
        KeyCode::Esc | KeyCode::Backspace => Some(Msg::Back),
        KeyCode::Enter => Some(Msg::Submit),
        KeyCode::Char('c') => Some(Msg::OpenSetup),
        KeyCode::Char('m') => Some(Msg::OpenMenu),
        KeyCode::Char('r') => Some(Msg::ReconnectAll),
        KeyCode::Char('/') => Some(Msg::StartFilter),
        KeyCode::Char('x') | KeyCode::Delete => Some(Msg::RemoveFocused),
        KeyCode::Tab => Some(Msg::CycleInstance),
        KeyCode::Up | KeyCode::Char('k') => Some(Msg::Navigate(DirectionKey::Up)),
        KeyCode::Down | KeyCode::Char('j') => Some(Msg::Navigate(DirectionKey::Down)),
        KeyCode::PageUp => Some(Msg::Navigate(DirectionKey::PageUp)),
        KeyCode::PageDown => Some(Msg::Navigate(DirectionKey::PageDown)),
        KeyCode::Char(digit @ '1'..='5') => {
            let index = usize::from(digit as u8 - b'1');
            ViewState::MENU.get(index).copied().map(Msg::SwitchView)
        }
        _ => None,
    }
}
