pub mod bank;

pub use bank::{QuestionBank, QuestionSource, StoredAnswer, StoredQuestion};
