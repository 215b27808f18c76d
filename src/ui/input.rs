use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What the interactive loop should do with a key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Bytes to send to the remote shell
    Forward(Vec<u8>),
    /// Leave the session
    Detach,
    Ignore,
}

/// Byte a terminal sends for Ctrl+`c`
pub fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        '8' => Some(0x7f),
        _ => None,
    }
}

/// Translate a key event into the bytes a VT terminal would send
pub fn encode_key(key_event: KeyEvent) -> Option<Vec<u8>> {
    let alt = key_event.modifiers.contains(KeyModifiers::ALT);
    let ctrl = key_event.modifiers.contains(KeyModifiers::CONTROL);

    let mut bytes = match key_event.code {
        KeyCode::Char(c) if ctrl => vec![control_byte(c)?],
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::F(n) => function_key(n)?,
        _ => return None,
    };

    if alt {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}

fn function_key(n: u8) -> Option<Vec<u8>> {
    let sequence: &[u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    };
    Some(sequence.to_vec())
}

/// Handle a key press in an interactive session
pub fn handle_key_event(key_event: KeyEvent, escape_byte: Option<u8>) -> KeyAction {
    if key_event.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }

    match encode_key(key_event) {
        Some(bytes) if escape_byte.is_some_and(|escape| bytes == [escape]) => KeyAction::Detach,
        Some(bytes) => KeyAction::Forward(bytes),
        None => KeyAction::Ignore,
    }
}
