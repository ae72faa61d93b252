//! Authorization-server endpoint metadata and per-region endpoint resolution.
//!
//! `descriptor` holds the validated endpoint set ([`ProviderDescriptor`]) for the three calls
//! of the device authorization grant. `resolver` maps a region onto a descriptor so one OIDC
//! client can serve every region a profile or SSO session names.

pub mod descriptor;
pub mod resolver;

pub use descriptor::*;
pub use resolver::*;
