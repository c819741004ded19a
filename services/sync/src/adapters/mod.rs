pub mod archive;
pub mod card_llm;
pub mod notion;
pub mod store;

pub use archive::ApkgArchiveAdapter;
pub use card_llm::OpenAiCardAdapter;
pub use notion::NotionTreeAdapter;
pub use store::SqliteStoreAdapter;
