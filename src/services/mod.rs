pub mod ai_client;
pub mod cache;
pub mod heuristic;
pub mod ocr;
pub mod plagiarism;
pub mod preprocess;
pub mod response_validator;
pub mod retry;
