pub mod model;

pub use model::{
    ConversationHistory, ConversationTurn, ExaminerModel, Role, ServiceError, Transcript,
    Utterance,
};
