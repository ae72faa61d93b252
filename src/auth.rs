//! Auth-domain identifiers, scope sets, and secret material.

pub mod id;
pub mod scope;
pub mod token {
	//! Secret-bearing values: bearer tokens, AWS credentials, and the redacting wrapper.

	pub mod bearer;
	pub mod credentials;
	pub mod secret;
}

pub use id::*;
pub use scope::*;
pub use token::{bearer::*, credentials::*, secret::*};
