pub mod events;
pub mod memes;
pub mod runs;
