//! Minimal job handlers used to exercise the protocol end to end.
//! Production handlers (web scraper, social-media scrapers,
//! transcription) are out of scope and register with the same
//! `tee_worker::Handler` trait from wherever they actually live.

mod echo;
mod web;

pub use echo::EchoHandler;
pub use web::WebHandler;
