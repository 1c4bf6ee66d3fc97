mod batcher;
pub mod model;
pub mod store;
pub mod tags;
pub mod thumbs;

pub use model::{
    DirInfo, IdPath, ImageId, Info, ListOptions, ListOrder, MissingFlags, MissingInfo,
    SourcedInfo, WriteMode,
};
pub use store::Catalog;
pub use tags::{Tag, TagEngine, TagId};
pub use thumbs::ThumbSink;
