//! Task request taxonomy.

pub mod kind;
pub mod request;

pub use kind::TaskKind;
pub use request::{
    AddMessagesRequest, BenchmarkMode, BenchmarkTestRequest, BubbleImportRequest,
    ConversationCutRequest, CurveParameters, HyperParamRequest, MessagePayload, ParameterRange,
    SearchRequest, SearchSettings, TaskPayload, TaskRequest,
};
