//! # busgate-modules
//!
//! Built-in modules that need no hardware. They let the full gateway run on a
//! laptop or in CI, and double as reference implementations of the module
//! contract.
//!
//! | Name | Kind | Behaviour |
//! |---|---|---|
//! | `log` | communication | Logs every transmitted message. |
//! | `console` | communication | Prints transmits to stdout; reads `<path> <content>` lines from stdin. |
//! | `virtual_switch` | interface | In-memory on/off switches exposed as nodes. |
//!
//! # Example
//!
//! ```rust
//! use busgate_modules::builtin_catalog;
//!
//! let catalog = builtin_catalog();
//! assert!(catalog.import("virtual_switch").is_some());
//! ```

pub mod console;
pub mod log;
pub mod virtual_switch;

use busgate_middleware::ModuleCatalog;

pub use console::ConsoleModule;
pub use log::LogModule;
pub use virtual_switch::VirtualSwitch;

/// Catalog containing every built-in module under its config name.
pub fn builtin_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .communication("log", LogModule::default)
        .communication("console", ConsoleModule::stdio)
        .interface("virtual_switch", VirtualSwitch::default)
}
