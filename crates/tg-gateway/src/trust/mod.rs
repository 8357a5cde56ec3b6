//! Trust material: SSH host keys and the worker RPC certificate bundle.

pub mod bundle;
pub mod hostkey;

pub use bundle::{generate_certificate_bundle, CertificateBundle};
pub use hostkey::{load_or_generate_host_key, HostKeyAlgorithm, KeyMaterial};
