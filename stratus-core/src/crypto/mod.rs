pub mod envelope;
pub mod primitives;

pub use envelope::{FieldValue, KeyInstance, HEADER_PREFIX, KEY_ENV_VAR};
pub use primitives::{sha256_hex, KdfCost};
