pub mod categorization;
pub mod question;

pub use categorization::{
    resolve_category, Categorization, CategorizedQuestion, CategoryFile, CategoryLabel,
    GroupedCategoryFile, CATEGORIES,
};
pub use question::{FailedImage, FolderSummary, ParsedQuestion, QuestionRecord, QuestionType};
