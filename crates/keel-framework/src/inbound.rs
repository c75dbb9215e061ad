//! The seam between keel and a messaging SDK.
//!
//! An [`Inbound`] is one incoming update (a message or a button press) plus
//! the operations needed to answer it. Adapting keel to a chat platform means
//! implementing this trait for the platform's update type.

use serde::{Deserialize, Serialize};

use crate::error::RenderResult;

/// Text markup understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// HTML tags.
    Html,
    /// Markdown markup.
    Markdown,
}

/// An inline button: the visible title and the data sent back when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Visible label.
    pub title: String,
    /// Callback data delivered with the button press.
    pub data: String,
}

impl Button {
    /// Creates a button.
    pub fn new(title: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: data.into(),
        }
    }
}

/// Rows of inline buttons attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    /// Button rows, top to bottom.
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    /// Lays `buttons` out in rows of at most `per_row` buttons.
    pub fn chunked(buttons: impl IntoIterator<Item = Button>, per_row: usize) -> Self {
        let buttons: Vec<Button> = buttons.into_iter().collect();
        let rows = buttons
            .chunks(per_row.max(1))
            .map(<[Button]>::to_vec)
            .collect();
        Self { rows }
    }

    /// All buttons in row order.
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    /// Returns `true` if the keyboard has no buttons.
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

/// How a text reply is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Reply to (quote) the inbound message.
    pub quote: bool,
    /// Markup of the text.
    pub parse_mode: Option<ParseMode>,
    /// Buttons attached to the reply.
    pub keyboard: Option<Keyboard>,
    /// Deliver silently.
    pub disable_notification: bool,
}

impl SendOptions {
    /// Plain options with `quote` set.
    pub fn quoted(quote: bool) -> Self {
        Self {
            quote,
            ..Self::default()
        }
    }
}

/// One incoming update and the ways to answer it.
///
/// Implementations are shared across the worker thread handling the update
/// and the dispatch loop, hence `Send + Sync`.
pub trait Inbound: Send + Sync {
    /// Text of the message, or the callback data of a button press.
    fn text(&self) -> Option<&str>;

    /// Identifier of the user who sent the update.
    fn sender(&self) -> Option<i64>;

    /// Returns `true` if the update is a button press on an earlier message.
    fn is_callback(&self) -> bool {
        false
    }

    /// Sends a text reply.
    fn reply_text(&self, text: &str, options: &SendOptions) -> RenderResult<()>;

    /// Sends a sticker reply.
    fn reply_sticker(&self, file_id: &str, quote: bool) -> RenderResult<()>;

    /// Replaces the text of the message a pressed button belongs to.
    ///
    /// `options.quote` has no meaning here and is ignored.
    fn edit_text(&self, text: &str, options: &SendOptions) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_chunked() {
        let keyboard = Keyboard::chunked((1..=5).map(|i| Button::new(i.to_string(), "x")), 2);
        let widths: Vec<_> = keyboard.rows.iter().map(Vec::len).collect();
        assert_eq!(widths, vec![2, 2, 1]);
        assert_eq!(keyboard.buttons().count(), 5);
        assert!(!keyboard.is_empty());
        assert!(Keyboard::chunked(Vec::new(), 4).is_empty());
    }
}
