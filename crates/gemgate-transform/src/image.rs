use gemgate_protocol::gemini::generate::{GenerateContentRequestBody, GenerateContentResponse, GenerationConfig};
use gemgate_protocol::gemini::imagen::{
    ImagenInstance, ImagenParameters, ImagenPredictRequestBody, ImagenPredictResponse,
};
use gemgate_protocol::gemini::types::{Content, ContentRole, Modality, SafetySetting};
use gemgate_protocol::openai::chat::CompletionUsage;
use gemgate_protocol::openai::images::{
    ImageData, ImageGenerationRequestBody, ImageGenerationResponse,
};

use crate::TransformError;
use crate::chat::response::map_usage;
use crate::ids;

/// Which upstream operation serves an alt image request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePlan {
    Imagen(ImagenPredictRequestBody),
    Generate(GenerateContentRequestBody),
}

pub fn plan_request(body: &ImageGenerationRequestBody) -> Result<ImagePlan, TransformError> {
    if body.response_format.as_deref() == Some("url") {
        return Err(TransformError::invalid(
            "response_format \"url\" is not supported; use \"b64_json\"",
        ));
    }

    let model = body.model.as_deref().unwrap_or_default();
    if model.to_ascii_lowercase().contains("imagen") {
        return Ok(ImagePlan::Imagen(ImagenPredictRequestBody {
            instances: vec![ImagenInstance {
                prompt: body.prompt.clone(),
            }],
            parameters: Some(ImagenParameters {
                sample_count: body.n,
                aspect_ratio: None,
                person_generation: None,
            }),
        }));
    }

    Ok(ImagePlan::Generate(GenerateContentRequestBody {
        contents: vec![Content::text(ContentRole::User, body.prompt.clone())],
        tools: None,
        tool_config: None,
        safety_settings: Some(SafetySetting::all_off()),
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec![Modality::Image, Modality::Text]),
            candidate_count: body.n,
            ..GenerationConfig::default()
        }),
    }))
}

pub fn from_imagen_response(native: &ImagenPredictResponse) -> ImageGenerationResponse {
    let data = native
        .predictions
        .iter()
        .filter_map(|prediction| prediction.bytes_base64_encoded.clone())
        .map(|b64_json| ImageData {
            b64_json,
            revised_prompt: None,
        })
        .collect();

    ImageGenerationResponse {
        created: ids::unix_now(),
        data,
        usage: None,
    }
}

/// Images come back as inlineData parts; any text alongside becomes the
/// revised prompt for every image of that candidate.
pub fn from_generate_response(native: &GenerateContentResponse) -> ImageGenerationResponse {
    let mut data = Vec::new();

    for candidate in &native.candidates {
        let mut revised_prompt = String::new();
        let mut images = Vec::new();
        for part in &candidate.content.parts {
            if part.is_thought() {
                continue;
            }
            if let Some(text) = &part.text {
                revised_prompt.push_str(text);
            }
            if let Some(blob) = &part.inline_data {
                images.push(blob.data.clone());
            }
        }
        let revised_prompt = if revised_prompt.is_empty() {
            None
        } else {
            Some(revised_prompt)
        };
        for b64_json in images {
            data.push(ImageData {
                b64_json,
                revised_prompt: revised_prompt.clone(),
            });
        }
    }

    ImageGenerationResponse {
        created: ids::unix_now(),
        data,
        usage: native
            .usage_metadata
            .as_ref()
            .map(map_usage)
            .map(strip_reasoning),
    }
}

fn strip_reasoning(mut usage: CompletionUsage) -> CompletionUsage {
    usage.output_tokens_details = None;
    usage
}

#[cfg(test)]
mod tests {
    use gemgate_protocol::gemini::types::Candidate;

    use super::*;

    fn request(model: &str, format: Option<&str>) -> ImageGenerationRequestBody {
        ImageGenerationRequestBody {
            prompt: "a red fox".to_string(),
            model: Some(model.to_string()),
            n: Some(2),
            size: None,
            response_format: format.map(|value| value.to_string()),
        }
    }

    #[test]
    fn imagen_models_use_the_predict_plan() {
        let plan = plan_request(&request("Imagen-3.0-generate", None)).unwrap();
        let ImagePlan::Imagen(body) = plan else {
            panic!("expected imagen plan");
        };
        assert_eq!(body.instances[0].prompt, "a red fox");
        assert_eq!(body.parameters.unwrap().sample_count, Some(2));
    }

    #[test]
    fn other_models_use_the_generate_plan() {
        let plan = plan_request(&request("gemini-2.0-flash", None)).unwrap();
        let ImagePlan::Generate(body) = plan else {
            panic!("expected generate plan");
        };
        let config = body.generation_config.unwrap();
        assert_eq!(
            config.response_modalities,
            Some(vec![Modality::Image, Modality::Text])
        );
        assert_eq!(config.candidate_count, Some(2));
    }

    #[test]
    fn url_response_format_is_declined() {
        assert!(plan_request(&request("gemini-2.0-flash", Some("url"))).is_err());
    }

    #[test]
    fn generate_response_pairs_images_with_revised_prompt() {
        let native = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![
                        gemgate_protocol::gemini::types::Part::text("a watercolor fox"),
                        gemgate_protocol::gemini::types::Part::inline_data("image/png", "QUJD"),
                    ],
                    role: Some(ContentRole::Model),
                },
                finish_reason: None,
                index: Some(0),
            }],
            ..GenerateContentResponse::default()
        };

        let alt = from_generate_response(&native);
        assert_eq!(alt.data.len(), 1);
        assert_eq!(alt.data[0].b64_json, "QUJD");
        assert_eq!(alt.data[0].revised_prompt.as_deref(), Some("a watercolor fox"));
    }
}
