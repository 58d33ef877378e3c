// SPDX-License-Identifier: Apache-2.0

//! The error type used throughout Kubescan.
//!
//! An `Error` is a linked list of messages ending in (optionally) a source
//! error. Context is pushed onto the front of the list as the error travels
//! up the call stack, so the outermost message describes what the user asked
//! for and the innermost one describes what actually broke.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;
use std::rc::Rc;

pub type Result<T> = std::result::Result<T, Error>;

/// A type convertible into a `Cow<'static, str>`.
///
/// This lets static error messages avoid an allocation.
pub trait Introspect: Into<Cow<'static, str>> {}
impl<T: Into<Cow<'static, str>>> Introspect for T {}

/// A chained error with cheap clones.
pub struct Error {
	/// The start of the error linked list.
	head: Rc<ErrorNode>,
}

impl Error {
	/// Create a new `Error` with a message source.
	pub fn msg<S>(message: S) -> Self
	where
		S: Into<Cow<'static, str>>,
	{
		let error = Message(message.into());
		Error::new(error)
	}

	/// Create a new `Error` from a source error.
	pub fn new<M>(error: M) -> Self
	where
		M: StdError + 'static,
	{
		Error {
			head: Rc::new(ErrorNode {
				current: Rc::new(error),
				next: None,
			}),
		}
	}

	/// Add additional context to an `Error`
	pub(crate) fn context<M>(self, context: M) -> Self
	where
		M: Introspect + 'static,
	{
		let message: Cow<'static, str> = context.into();

		log::trace!(
			"adding context to error [context: {}, error: {}]",
			message,
			self.head
		);

		Error {
			head: Rc::new(ErrorNode {
				current: Rc::new(Message(message)),
				next: Some(self.head),
			}),
		}
	}

	/// Get an iterator over the errors in a chain.
	pub fn chain(&self) -> Chain<'_> {
		Chain::new(self)
	}

	/// Render every message in the chain on a single line.
	///
	/// Used where an error is recorded as data (for example in a report)
	/// rather than printed for a user.
	pub fn one_line(&self) -> String {
		self.chain()
			.map(|node| node.to_string())
			.collect::<Vec<_>>()
			.join(": ")
	}
}

/// Allows use of `?` on any standard error.
impl<T> From<T> for Error
where
	T: StdError + 'static,
{
	fn from(std_error: T) -> Error {
		Error::new(std_error)
	}
}

impl Clone for Error {
	fn clone(&self) -> Error {
		Error {
			head: Rc::clone(&self.head),
		}
	}
}

impl Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Debug::fmt(self.head.as_ref(), f)
	}
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(self.head.as_ref(), f)
	}
}

/// A single node in the linked list of errors.
pub struct ErrorNode {
	/// The current error.
	current: ErrorObj,
	/// A next error, if present.
	next: Option<ErrorLink>,
}

impl Debug for ErrorNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.current)?;

		if self.next.is_some() {
			write!(f, "\n\nCaused by: ")?;

			let mut index = 0;
			let mut link = self.next.as_ref();

			while let Some(step) = link {
				write!(f, "\n{:5}: {}", index, step.current)?;
				link = step.next.as_ref();
				index += 1;
			}
		}

		Ok(())
	}
}

impl Display for ErrorNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.current)
	}
}

impl StdError for ErrorNode {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		self.next
			.as_deref()
			.map(|node| node as &(dyn StdError + 'static))
	}
}

/// A reference-counted fat pointer to a standard error type.
type ErrorObj = Rc<dyn StdError + 'static>;

/// A link in the linked list.
type ErrorLink = Rc<ErrorNode>;

/// A string-only error message.
#[derive(Debug)]
struct Message(Cow<'static, str>);

impl Display for Message {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl StdError for Message {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		None
	}
}

pub struct Chain<'e> {
	current: Option<&'e ErrorNode>,
}

impl<'e> Chain<'e> {
	fn new(error: &'e Error) -> Chain<'e> {
		Chain {
			current: Some(error.head.as_ref()),
		}
	}
}

impl<'e> Iterator for Chain<'e> {
	type Item = &'e ErrorNode;

	fn next(&mut self) -> Option<Self::Item> {
		let node = self.current?;
		self.current = node.next.as_deref();
		Some(node)
	}
}

/// A limited analogue of the `anyhow!` macro for `Error`.
#[macro_export]
macro_rules! ks_error {
    ($msg:literal $(,)?) => {
        $crate::error::Error::msg($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::msg(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
	use crate::context::Context as _;

	#[test]
	fn macro_literal() {
		let error = ks_error!("msg source");
		assert_eq!("msg source", format!("{:?}", error));
	}

	#[test]
	fn macro_format_string() {
		let image = "nginx:1.25";
		let error = ks_error!("failed to scan '{}' after {} attempts", image, 3);
		assert_eq!(
			"failed to scan 'nginx:1.25' after 3 attempts",
			error.to_string()
		);
	}

	#[test]
	fn chain_walks_outermost_first() {
		let error = ks_error!("connection refused")
			.context("poll failed")
			.context("scanning 'app:v1'");

		let mut iter = error.chain();

		assert_eq!("scanning 'app:v1'", iter.next().unwrap().to_string());
		assert_eq!("poll failed", iter.next().unwrap().to_string());
		assert_eq!("connection refused", iter.next().unwrap().to_string());
		assert!(iter.next().is_none());
	}

	#[test]
	fn one_line_joins_chain() {
		let result: Result<(), std::io::Error> = Err(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			"no such file",
		));
		let error = result.context("failed to open report").unwrap_err();

		assert_eq!("failed to open report: no such file", error.one_line());
	}
}
