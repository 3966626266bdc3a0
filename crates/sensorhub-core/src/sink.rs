//! Output sink abstraction.

use crate::Result;

/// Consumer of rendered log text.
///
/// Implementations decide where the text goes (console, file, both).
pub trait Sink: Send {
    /// Writes one rendered block.
    fn consume(&mut self, text: &str) -> Result<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn consume(&mut self, text: &str) -> Result<()> {
        (**self).consume(text)
    }
}

impl Sink for Vec<String> {
    fn consume(&mut self, text: &str) -> Result<()> {
        self.push(text.to_string());
        Ok(())
    }
}
