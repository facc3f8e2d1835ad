//! X11 keysym lookup for xdotool-style key names.

/// Resolve a single key name (`Return`, `ctrl`, `F5`, `a`) to its keysym.
pub fn lookup(name: &str) -> Option<u32> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(char_keysym(c));
    }

    let lower = name.to_ascii_lowercase();
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=24).contains(&n) {
            return Some(0xffbe + n - 1);
        }
    }
    if let Some(n) = lower.strip_prefix("kp_").and_then(|n| n.parse::<u32>().ok()) {
        if n <= 9 {
            return Some(0xffb0 + n);
        }
    }

    Some(match lower.as_str() {
        "return" | "enter" => 0xff0d,
        "tab" => 0xff09,
        "escape" | "esc" => 0xff1b,
        "backspace" => 0xff08,
        "delete" | "del" => 0xffff,
        "insert" => 0xff63,
        "home" => 0xff50,
        "end" => 0xff57,
        "page_up" | "pageup" | "prior" => 0xff55,
        "page_down" | "pagedown" | "next" => 0xff56,
        "left" => 0xff51,
        "up" => 0xff52,
        "right" => 0xff53,
        "down" => 0xff54,
        "space" => 0x20,
        "plus" => 0x2b,
        "minus" => 0x2d,
        "print" => 0xff61,
        "menu" => 0xff67,
        "caps_lock" => 0xffe5,
        "kp_enter" => 0xff8d,
        "shift" | "shift_l" => 0xffe1,
        "shift_r" => 0xffe2,
        "ctrl" | "control" | "control_l" | "ctrl_l" => 0xffe3,
        "control_r" | "ctrl_r" => 0xffe4,
        "alt" | "alt_l" => 0xffe9,
        "alt_r" => 0xffea,
        "super" | "super_l" | "win" | "meta" | "cmd" => 0xffeb,
        "super_r" => 0xffec,
        _ => return None,
    })
}

/// Keysym for a literal character, as typed.
pub fn char_keysym(c: char) -> u32 {
    match c {
        '\n' | '\r' => 0xff0d,
        '\t' => 0xff09,
        // Latin-1 maps directly.
        c if (c as u32) < 0x100 => c as u32,
        c => 0x0100_0000 | c as u32,
    }
}

/// Parse a `+`-separated combo such as `ctrl+shift+t` into keysyms, in
/// press order.
pub fn parse_combo(combo: &str) -> Result<Vec<u32>, String> {
    if combo == "+" {
        return Ok(vec![char_keysym('+')]);
    }
    combo
        .split('+')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("Invalid key combination: {combo}"));
            }
            lookup(part).ok_or_else(|| format!("Unknown key name: {part}"))
        })
        .collect()
}
