//! The value a command produces.

use crate::inbound::ParseMode;

/// What a command wants to say back.
///
/// How a `Reply` is delivered depends on the command's
/// [`ReplyKind`](crate::ReplyKind): `body` is the text of a text reply, the
/// file id of a sticker, or the prompt above a set of options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Text, sticker id, or prompt.
    pub body: String,
    /// Overrides whether the reply quotes the inbound message.
    pub quote: Option<bool>,
    /// Markup of `body`.
    pub parse_mode: Option<ParseMode>,
    /// Current page and page count of a paginated listing.
    pub page: Option<(usize, usize)>,
    /// Choices offered as buttons.
    pub options: Vec<String>,
}

impl Reply {
    /// A reply with the given body and default settings.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// A reply that renders nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets whether the reply quotes the inbound message.
    pub fn quote(mut self, quote: bool) -> Self {
        self.quote = Some(quote);
        self
    }

    /// Sets the markup of the body.
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    /// Marks this reply as page `page` (1-based) of `pages`.
    pub fn page(mut self, page: usize, pages: usize) -> Self {
        self.page = Some((page, pages));
        self
    }

    /// Offers `options` as buttons under the body.
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl<S: Into<String>> From<(S, bool)> for Reply {
    fn from((body, quote): (S, bool)) -> Self {
        Self::new(body).quote(quote)
    }
}
