pub mod ring;
pub mod special;
