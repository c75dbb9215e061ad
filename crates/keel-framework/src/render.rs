//! Reply rendering strategies.
//!
//! Every command declares a [`ReplyKind`]. Once the command's promise has
//! settled, the kind's [`RenderStrategy`] turns the value, or the rejection,
//! into messages sent through the [`Inbound`].
//!
//! | Kind                     | Resolved value                                  | Rejection            |
//! |--------------------------|-------------------------------------------------|----------------------|
//! | [`ReplyKind::Silent`]    | nothing                                         | logged only          |
//! | [`ReplyKind::Text`]      | text reply, quoted unless the reply says not to | quoted error text    |
//! | [`ReplyKind::Sticker`]   | sticker reply                                   | quoted error text    |
//! | [`ReplyKind::Options`]   | prompt with a keyboard of options, 2 per row    | quoted error text    |
//! | [`ReplyKind::SetOption`] | edits the message the pressed button is on      | edits with the error |
//! | [`ReplyKind::Paginated`] | page text with a page keyboard, 4 per row       | quoted error text    |

use keel_core::Rejection;
use tracing::warn;

use crate::error::{CommandError, RenderResult};
use crate::inbound::{Button, Inbound, Keyboard, SendOptions};
use crate::reply::Reply;

/// Most page buttons shown at once.
pub const MAX_PAGE_BUTTONS: usize = 8;

const OPTIONS_PER_ROW: usize = 2;
const PAGES_PER_ROW: usize = 4;

/// Turns a settled command outcome into messages.
pub trait RenderStrategy: Send + Sync {
    /// Renders a resolved value.
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()>;

    /// Renders a rejection. Sends the error text as a quoted reply by default.
    fn rejected(&self, target: &dyn Inbound, error: &Rejection) -> RenderResult<()> {
        target.reply_text(&error_text(error), &SendOptions::quoted(true))
    }
}

/// Which [`RenderStrategy`] a command's result goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplyKind {
    /// Render nothing.
    Silent,
    /// Plain text.
    #[default]
    Text,
    /// A sticker, `body` being its file id.
    Sticker,
    /// A prompt with selectable options.
    Options,
    /// Replace the message a pressed button belongs to.
    SetOption,
    /// One page of a paginated listing.
    Paginated,
}

impl ReplyKind {
    /// The strategy implementing this kind.
    pub fn strategy(self) -> &'static dyn RenderStrategy {
        match self {
            Self::Silent => &Silent,
            Self::Text => &Text,
            Self::Sticker => &Sticker,
            Self::Options => &Options,
            Self::SetOption => &SetOption,
            Self::Paginated => &Paginated,
        }
    }

    /// Renders a settled outcome with this kind's strategy.
    pub fn render(
        self,
        target: &dyn Inbound,
        outcome: &Result<Reply, Rejection>,
    ) -> RenderResult<()> {
        let strategy = self.strategy();
        match outcome {
            Ok(reply) => strategy.resolved(target, reply),
            Err(error) => strategy.rejected(target, error),
        }
    }
}

/// User-visible text for a rejection.
///
/// A [`CommandError`] shows its message, a timeout reads `timed out`, and
/// anything else is shown in its `Debug` form.
pub fn error_text(error: &Rejection) -> String {
    if let Some(e) = error.downcast_ref::<CommandError>() {
        e.message().to_string()
    } else if error.is_timeout() {
        "timed out".to_string()
    } else {
        format!("{error:?}")
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Renders nothing; rejections are only logged.
#[derive(Debug, Clone, Copy)]
pub struct Silent;

impl RenderStrategy for Silent {
    fn resolved(&self, _target: &dyn Inbound, _reply: &Reply) -> RenderResult<()> {
        Ok(())
    }

    fn rejected(&self, _target: &dyn Inbound, error: &Rejection) -> RenderResult<()> {
        warn!(error = %error, "Silent command rejected");
        Ok(())
    }
}

/// Sends the body as a text reply.
#[derive(Debug, Clone, Copy)]
pub struct Text;

impl RenderStrategy for Text {
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()> {
        if reply.is_empty() {
            return Ok(());
        }
        let options = SendOptions {
            quote: reply.quote.unwrap_or(true),
            parse_mode: reply.parse_mode,
            ..SendOptions::default()
        };
        target.reply_text(&reply.body, &options)
    }
}

/// Sends the body as a sticker file id.
#[derive(Debug, Clone, Copy)]
pub struct Sticker;

impl RenderStrategy for Sticker {
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()> {
        if reply.is_empty() {
            return Ok(());
        }
        target.reply_sticker(&reply.body, reply.quote.unwrap_or(true))
    }
}

/// Sends the body with one button per option.
#[derive(Debug, Clone, Copy)]
pub struct Options;

impl RenderStrategy for Options {
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()> {
        if reply.options.is_empty() {
            return target.reply_text(&reply.body, &SendOptions::quoted(true));
        }
        let buttons = reply.options.iter().map(|o| Button::new(o.as_str(), o.as_str()));
        let options = SendOptions {
            quote: reply.quote.unwrap_or(false),
            parse_mode: reply.parse_mode,
            keyboard: Some(Keyboard::chunked(buttons, OPTIONS_PER_ROW)),
            ..SendOptions::default()
        };
        target.reply_text(&reply.body, &options)
    }
}

/// Replaces the message a pressed button belongs to.
#[derive(Debug, Clone, Copy)]
pub struct SetOption;

impl RenderStrategy for SetOption {
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()> {
        if reply.is_empty() {
            return Ok(());
        }
        let options = SendOptions {
            parse_mode: reply.parse_mode,
            ..SendOptions::default()
        };
        target.edit_text(&reply.body, &options)
    }

    fn rejected(&self, target: &dyn Inbound, error: &Rejection) -> RenderResult<()> {
        target.edit_text(&error_text(error), &SendOptions::default())
    }
}

/// Sends one page of a listing with buttons to the other pages.
///
/// A button press edits the message it came from instead of replying.
#[derive(Debug, Clone, Copy)]
pub struct Paginated;

impl RenderStrategy for Paginated {
    fn resolved(&self, target: &dyn Inbound, reply: &Reply) -> RenderResult<()> {
        let (page, pages) = reply.page.unwrap_or((1, 1));
        if pages <= 1 {
            return Text.resolved(target, reply);
        }

        let options = SendOptions {
            quote: reply.quote.unwrap_or(true),
            parse_mode: reply.parse_mode,
            keyboard: Some(Keyboard::chunked(page_buttons(page, pages), PAGES_PER_ROW)),
            ..SendOptions::default()
        };
        if target.is_callback() {
            target.edit_text(&reply.body, &options)
        } else {
            target.reply_text(&reply.body, &options)
        }
    }
}

/// Buttons for navigating to the pages of a `pages`-page listing.
///
/// Up to [`MAX_PAGE_BUTTONS`] pages get one button each. Longer listings show
/// a window of that many buttons around `page`: the first always leads to page
/// 1, the last to the final page, and their neighbours read `...` unless they
/// sit right next to the ends.
pub fn page_buttons(page: usize, pages: usize) -> Vec<Button> {
    let button = |title: String, target: usize| Button::new(title, target.to_string());

    if pages <= MAX_PAGE_BUTTONS {
        return (1..=pages).map(|i| button(i.to_string(), i)).collect();
    }

    let half = (MAX_PAGE_BUTTONS / 2) as isize;
    let (page, pages) = (page as isize, pages as isize);
    let mut min_page = page - half;
    let mut max_page = page + half;
    if min_page <= 0 {
        max_page -= min_page - 1;
        min_page = 1;
    } else if max_page > pages {
        min_page -= max_page - pages - 1;
        max_page = pages + 1;
    }

    (min_page..max_page)
        .map(|i| {
            let (title, target) = if i == min_page {
                ("1".to_string(), 1)
            } else if i == max_page - 1 {
                (pages.to_string(), pages)
            } else if (i == min_page + 1 && i != 2) || (i == max_page - 2 && i != pages - 1) {
                ("...".to_string(), i)
            } else {
                (i.to_string(), i)
            };
            button(title, target as usize)
        })
        .collect()
}
