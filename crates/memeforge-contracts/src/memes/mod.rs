mod descriptor;
mod files;

pub use descriptor::{
    value_as_text, CaptionSpec, MemeDescriptor, DEFAULT_CAPTION_FONT_SIZE, DEFAULT_CAPTION_WIDTH,
    DEFAULT_MEME_HEIGHT, DEFAULT_MEME_WIDTH,
};
pub use files::GeneratedFile;
