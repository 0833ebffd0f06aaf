//! 与具体编码无关的基本流帧缓存与时间戳处理.

pub mod config;
pub mod frame;
pub mod stats;
pub mod timeline;

pub use config::EsParserConfig;
pub use frame::{Frame, FrameType, PictureOrder, PictureStructure};
pub use stats::{DurationFrequency, ParserStats};
pub use timeline::{ProvidedTimestamp, Timeline};
