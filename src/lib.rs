//! Grade and bulk-upload engines for the academics portal.
//!
//! Both engines are plain synchronous functions over their inputs. The
//! `academicsd` binary wraps them in a JSON-lines sidecar with workspace
//! storage; other front ends can link this crate directly.

pub mod calc;
pub mod error;
pub mod upload;
