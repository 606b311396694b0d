use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use shared::domain::is_pad_digit;

/// Everything a key press can mean to the dial pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialerAction {
    Digit(char),
    DeleteDigit,
    PlaceCall,
    HangUp,
    ToggleMute,
    ToggleSpeaker,
    PrevCountry,
    NextCountry,
    NextPackage,
    Checkout,
    RefreshBalance,
    Quit,
}

pub fn map_key(key: &KeyEvent) -> Option<DialerAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(DialerAction::Quit),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) if is_pad_digit(c) => Some(DialerAction::Digit(c)),
        KeyCode::Backspace => Some(DialerAction::DeleteDigit),
        KeyCode::Enter => Some(DialerAction::PlaceCall),
        KeyCode::Esc | KeyCode::Char('h') => Some(DialerAction::HangUp),
        KeyCode::Char('m') => Some(DialerAction::ToggleMute),
        KeyCode::Char('s') => Some(DialerAction::ToggleSpeaker),
        KeyCode::Left => Some(DialerAction::PrevCountry),
        KeyCode::Right => Some(DialerAction::NextCountry),
        KeyCode::Char('b') => Some(DialerAction::NextPackage),
        KeyCode::Char('B') => Some(DialerAction::Checkout),
        KeyCode::Char('r') => Some(DialerAction::RefreshBalance),
        KeyCode::Char('q') => Some(DialerAction::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn pad_characters_map_to_digits() {
        for c in ['0', '5', '9', '*', '#'] {
            assert_eq!(
                map_key(&plain(KeyCode::Char(c))),
                Some(DialerAction::Digit(c))
            );
        }
        assert_eq!(map_key(&plain(KeyCode::Char('x'))), None);
    }

    #[test]
    fn control_keys_map_to_call_actions() {
        assert_eq!(map_key(&plain(KeyCode::Enter)), Some(DialerAction::PlaceCall));
        assert_eq!(map_key(&plain(KeyCode::Esc)), Some(DialerAction::HangUp));
        assert_eq!(
            map_key(&plain(KeyCode::Char('h'))),
            Some(DialerAction::HangUp)
        );
        assert_eq!(
            map_key(&plain(KeyCode::Backspace)),
            Some(DialerAction::DeleteDigit)
        );
        assert_eq!(
            map_key(&plain(KeyCode::Char('m'))),
            Some(DialerAction::ToggleMute)
        );
        assert_eq!(
            map_key(&plain(KeyCode::Char('s'))),
            Some(DialerAction::ToggleSpeaker)
        );
        assert_eq!(map_key(&plain(KeyCode::Left)), Some(DialerAction::PrevCountry));
        assert_eq!(map_key(&plain(KeyCode::Right)), Some(DialerAction::NextCountry));
    }

    #[test]
    fn shifted_b_checks_out_while_plain_b_cycles_packages() {
        assert_eq!(
            map_key(&plain(KeyCode::Char('b'))),
            Some(DialerAction::NextPackage)
        );
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('B'), KeyModifiers::SHIFT)),
            Some(DialerAction::Checkout)
        );
    }

    #[test]
    fn ctrl_c_and_q_both_quit() {
        assert_eq!(map_key(&plain(KeyCode::Char('q'))), Some(DialerAction::Quit));
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(DialerAction::Quit)
        );
        // Plain 'c' is unassigned.
        assert_eq!(map_key(&plain(KeyCode::Char('c'))), None);
    }
}
