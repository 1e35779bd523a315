//! Mock rule model and store.

pub mod store;
pub mod types;

pub use store::MockStore;
pub use types::{
    ConditionOperator, ConditionValue, FieldSpec, GeneratedResponse, HeaderCondition, MatchRule,
    MockPayload, MockType, QueryCondition, RequestDescriptor, ResponseMeta, ResponseRewrite, Rule,
    StateEntry, UrlMatch, UrlMatchType,
};
