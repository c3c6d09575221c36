pub mod client;

pub use client::{TranslationClient, TranslationError, Translator};
