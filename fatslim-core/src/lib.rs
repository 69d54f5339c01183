pub mod arch;
pub mod binary;
pub mod commit;
pub mod error;
pub mod header;
pub mod probe;
pub mod selector;
pub mod trim;
pub mod verify;
pub mod writer;

pub use arch::*;
pub use binary::*;
pub use commit::commit;
pub use error::*;
pub use header::{ContainerHeader, FatVariant, SliceDescriptor};
pub use probe::*;
pub use selector::*;
pub use trim::*;
pub use verify::verify;
pub use writer::*;
