/// Greedy word wrap: words join the current line while it measures within
/// `max_width`. A single word wider than the box sits on its own line.
pub fn wrap_text(text: &str, max_width: u32, measure: impl Fn(&str) -> u32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let kept = current.len();
        current.push(' ');
        current.push_str(word);
        if measure(&current) > max_width {
            current.truncate(kept);
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Left edge that centers a line of `text_width` in a box at `x`.
pub fn centered_x(x: i32, box_width: u32, text_width: u32) -> i32 {
    let slack = i64::from(box_width) - i64::from(text_width);
    let left = i64::from(x) + slack.div_euclid(2);
    left.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
