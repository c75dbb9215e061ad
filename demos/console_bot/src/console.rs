//! Terminal lines as bot updates.
//!
//! Line syntax:
//!
//! ```text
//! /echo hi          message from user 1
//! #7 /admin         message from user 7
//! !red              press the button whose data is "red"
//! ```

use keel::framework::{Inbound, Keyboard, RenderResult, SendOptions};

const DEFAULT_SENDER: i64 = 1;

/// One stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleInbound {
    id: u64,
    text: String,
    sender: i64,
    callback: bool,
}

impl ConsoleInbound {
    /// Parses a line; blank lines are not updates.
    pub fn parse(id: u64, line: &str) -> Option<Self> {
        let mut rest = line.trim();
        let mut sender = DEFAULT_SENDER;

        if let Some(tagged) = rest.strip_prefix('#')
            && let Some((user, text)) = tagged.split_once(char::is_whitespace)
            && let Ok(user) = user.parse()
        {
            sender = user;
            rest = text.trim_start();
        }

        let (text, callback) = match rest.strip_prefix('!') {
            Some(data) => (data.trim(), true),
            None => (rest, false),
        };
        if text.is_empty() {
            return None;
        }

        Some(Self {
            id,
            text: text.to_string(),
            sender,
            callback,
        })
    }

    fn print(&self, marker: &str, text: &str, keyboard: Option<&Keyboard>) {
        let mut out = format!("[{}] {marker} {text}", self.id);
        for row in keyboard.map(|k| k.rows.as_slice()).unwrap_or_default() {
            out.push_str("\n     ");
            for button in row {
                out.push_str(&format!(" [{}]", button.title));
            }
        }
        println!("{out}");
    }
}

impl Inbound for ConsoleInbound {
    fn text(&self) -> Option<&str> {
        Some(&self.text)
    }

    fn sender(&self) -> Option<i64> {
        Some(self.sender)
    }

    fn is_callback(&self) -> bool {
        self.callback
    }

    fn reply_text(&self, text: &str, options: &SendOptions) -> RenderResult<()> {
        let marker = if options.quote { ">>" } else { ">" };
        self.print(marker, text, options.keyboard.as_ref());
        Ok(())
    }

    fn reply_sticker(&self, file_id: &str, quote: bool) -> RenderResult<()> {
        let marker = if quote { ">>" } else { ">" };
        self.print(marker, &format!("<sticker {file_id}>"), None);
        Ok(())
    }

    fn edit_text(&self, text: &str, options: &SendOptions) -> RenderResult<()> {
        self.print("~", text, options.keyboard.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let plain = ConsoleInbound::parse(1, "  /echo hi ").unwrap();
        assert_eq!(plain.text(), Some("/echo hi"));
        assert_eq!(plain.sender(), Some(DEFAULT_SENDER));
        assert!(!plain.is_callback());

        let tagged = ConsoleInbound::parse(2, "#7 /admin").unwrap();
        assert_eq!(tagged.sender(), Some(7));
        assert_eq!(tagged.text(), Some("/admin"));

        let pressed = ConsoleInbound::parse(3, "#7 !red").unwrap();
        assert!(pressed.is_callback());
        assert_eq!(pressed.text(), Some("red"));

        assert_eq!(ConsoleInbound::parse(4, "   "), None);
        assert_eq!(ConsoleInbound::parse(5, "!"), None);
        assert_eq!(
            ConsoleInbound::parse(6, "#nope hi").unwrap().text(),
            Some("#nope hi")
        );
    }
}
