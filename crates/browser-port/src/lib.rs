//! Browser automation port: a small typed surface over one Chromium page.
//!
//! The crate exposes [`BrowserSession`], the seam every higher layer drives,
//! plus the CDP-backed implementation used in production. Element handles are
//! synthesized attribute selectors, so they survive as long as the tagged DOM
//! node does and nothing here holds remote object references.

pub mod cdp;
pub mod config;
pub mod error;
pub mod locator;
pub mod session;

pub use cdp::{CdpBrowserSession, CdpTransport, ChromiumTransport, CommandTarget};
pub use config::{detect_chrome_executable, SessionConfig};
pub use error::{PortError, PortErrorKind};
pub use locator::{ElementHandle, Locator, SelectorSpec, ANCHOR_ATTR};
pub use session::{BrowserSession, CookieParam, WaitCondition};
