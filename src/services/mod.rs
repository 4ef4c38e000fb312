pub(crate) mod ai_client;
pub(crate) mod errors;
pub(crate) mod image_preprocess;
pub(crate) mod ocr_engine;
pub(crate) mod result_cache;
pub(crate) mod scoring;
pub(crate) mod text_extraction;
pub(crate) mod text_structure;
