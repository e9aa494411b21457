pub mod plates;

pub use plates::PlatesRepository;
