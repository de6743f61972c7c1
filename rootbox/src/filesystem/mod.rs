pub mod binding;
mod canonicalization;
pub mod ext;
mod fs;
pub mod glue;
mod initialization;
pub mod proc;
pub mod readers;
mod substitution;
pub mod temp;
mod translation;
pub mod validation;

pub use self::binding::{Binding, PathComparison, Side};
pub use self::canonicalization::Canonicalizer;
pub use self::fs::FileSystem;
pub use self::initialization::Initialiser;
pub use self::readers::ExtraReader;
pub use self::substitution::Substitutor;
pub use self::translation::Translator;
