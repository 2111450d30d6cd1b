pub mod evaluator;
pub mod memory;

pub use evaluator::Evaluator;
pub use memory::MemoryStore;
