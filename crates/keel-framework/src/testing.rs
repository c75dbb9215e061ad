//! An [`Inbound`] that records what was sent to it.

use parking_lot::Mutex;

use crate::error::RenderResult;
use crate::inbound::{Inbound, SendOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    Text { text: String, options: SendOptions },
    Sticker { file_id: String, quote: bool },
    Edit { text: String, options: SendOptions },
}

impl Sent {
    pub(crate) fn text(text: &str, quote: bool) -> Self {
        Self::Text {
            text: text.to_string(),
            options: SendOptions::quoted(quote),
        }
    }

    pub(crate) fn edit(text: &str) -> Self {
        Self::Edit {
            text: text.to_string(),
            options: SendOptions::default(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingInbound {
    text: Option<String>,
    sender: Option<i64>,
    callback: bool,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingInbound {
    pub(crate) fn message(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            sender: Some(1),
            ..Self::default()
        }
    }

    pub(crate) fn callback(data: &str) -> Self {
        Self {
            callback: true,
            ..Self::message(data)
        }
    }

    pub(crate) fn from_user(mut self, sender: Option<i64>) -> Self {
        self.sender = sender;
        self
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

impl Inbound for RecordingInbound {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn sender(&self) -> Option<i64> {
        self.sender
    }

    fn is_callback(&self) -> bool {
        self.callback
    }

    fn reply_text(&self, text: &str, options: &SendOptions) -> RenderResult<()> {
        self.sent.lock().push(Sent::Text {
            text: text.to_string(),
            options: options.clone(),
        });
        Ok(())
    }

    fn reply_sticker(&self, file_id: &str, quote: bool) -> RenderResult<()> {
        self.sent.lock().push(Sent::Sticker {
            file_id: file_id.to_string(),
            quote,
        });
        Ok(())
    }

    fn edit_text(&self, text: &str, options: &SendOptions) -> RenderResult<()> {
        self.sent.lock().push(Sent::Edit {
            text: text.to_string(),
            options: options.clone(),
        });
        Ok(())
    }
}
