mod linked;
pub use linked::LinkedIter;
