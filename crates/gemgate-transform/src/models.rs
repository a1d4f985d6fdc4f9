use gemgate_protocol::gemini::models::ListModelsResponse;
use gemgate_protocol::openai::embeddings::ListObjectType;
use gemgate_protocol::openai::models::{ModelList, ModelObject, ModelObjectType};

use crate::ids;

pub fn to_alt_models(native: &ListModelsResponse) -> ModelList {
    let created = ids::unix_now();
    let data = native
        .models
        .iter()
        .map(|model| ModelObject {
            id: model.id().to_string(),
            object: ModelObjectType::Model,
            created,
            owned_by: "google".to_string(),
        })
        .collect();

    ModelList {
        object: ListObjectType::List,
        data,
    }
}
