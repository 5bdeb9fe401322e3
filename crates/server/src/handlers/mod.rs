//! HTTP request handlers.

pub mod assets;
pub mod capabilities;
pub mod domains;
pub mod http;
pub mod proposals;
pub mod uploads;

pub use assets::*;
pub use capabilities::*;
pub use domains::*;
pub use http::*;
pub use proposals::*;
pub use uploads::*;
