pub mod review;
pub mod testgen;
pub mod writer;
