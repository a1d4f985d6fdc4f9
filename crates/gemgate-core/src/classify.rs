use http::Method;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Generate,
    StreamGenerate,
    Embed,
    BatchEmbed,
    CountTokens,
    ImageGemini,
    ImageImagen,
    ListModels,
    GetModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteClass {
    Native {
        op: NativeOp,
        model: Option<String>,
    },
    AltChat,
    AltEmbed,
    AltImage,
    AltModels,
}

impl RouteClass {
    pub fn is_stream_op(&self) -> bool {
        matches!(
            self,
            RouteClass::Native {
                op: NativeOp::StreamGenerate,
                ..
            }
        )
    }

    pub fn operation(&self) -> &'static str {
        match self {
            RouteClass::Native { op, .. } => match op {
                NativeOp::Generate => "gemini.generate",
                NativeOp::StreamGenerate => "gemini.generate_stream",
                NativeOp::Embed => "gemini.embed",
                NativeOp::BatchEmbed => "gemini.batch_embed",
                NativeOp::CountTokens => "gemini.count_tokens",
                NativeOp::ImageGemini => "gemini.image_generate",
                NativeOp::ImageImagen => "gemini.image_imagen",
                NativeOp::ListModels => "gemini.models_list",
                NativeOp::GetModel => "gemini.models_get",
            },
            RouteClass::AltChat => "openai.chat",
            RouteClass::AltEmbed => "openai.embeddings",
            RouteClass::AltImage => "openai.images",
            RouteClass::AltModels => "openai.models_list",
        }
    }
}

/// Map an incoming method and path (gateway prefix already stripped) to a
/// route class. Classification is path-only; bodies are parsed later by the
/// dispatcher.
pub fn classify_request(method: &Method, path: &str) -> Result<RouteClass, ProxyError> {
    let path = path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return Err(ProxyError::not_found("missing path"));
    }

    match segments.as_slice() {
        [.., "chat", "completions"] => {
            ensure_method(method, Method::POST, "chat completions")?;
            Ok(RouteClass::AltChat)
        }
        [.., "embeddings"] => {
            ensure_method(method, Method::POST, "embeddings")?;
            Ok(RouteClass::AltEmbed)
        }
        [.., "images", "generations"] => {
            ensure_method(method, Method::POST, "image generations")?;
            Ok(RouteClass::AltImage)
        }
        ["v1", "models"] => {
            ensure_method(method, Method::GET, "models list")?;
            Ok(RouteClass::AltModels)
        }
        _ => classify_native(method, &segments),
    }
}

fn classify_native(method: &Method, segments: &[&str]) -> Result<RouteClass, ProxyError> {
    // Provider-style paths: /v{N}[beta]/models/..., /v{N}[beta]/tunedModels/...
    // or bare /tunedModels/...
    let marker = match segments {
        ["tunedModels", ..] => 1,
        [version, "models" | "tunedModels", ..] if is_api_version(version) => 2,
        _ => return Err(ProxyError::not_found("unknown route")),
    };

    let rest = &segments[marker..];
    if rest.is_empty() {
        ensure_method(method, Method::GET, "models list")?;
        return Ok(RouteClass::Native {
            op: NativeOp::ListModels,
            model: None,
        });
    }

    let joined = rest.join("/");
    let (model, action) = split_model_action(&joined);
    let model = Some(model.to_string());

    let Some(action) = action else {
        ensure_method(method, Method::GET, "model get")?;
        return Ok(RouteClass::Native {
            op: NativeOp::GetModel,
            model,
        });
    };

    let op = match action {
        "generateContent" => NativeOp::Generate,
        "streamGenerateContent" => NativeOp::StreamGenerate,
        "embedContent" => NativeOp::Embed,
        "batchEmbedContents" => NativeOp::BatchEmbed,
        "countTokens" => NativeOp::CountTokens,
        "generateImageWithGemini" => NativeOp::ImageGemini,
        "generateImageWithImagen" => NativeOp::ImageImagen,
        _ => return Err(ProxyError::not_found("unknown model action")),
    };
    ensure_method(method, Method::POST, "model action")?;

    Ok(RouteClass::Native { op, model })
}

fn is_api_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|first| first.is_ascii_digit())
}

fn split_model_action(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((model, action)) => (model, Some(action)),
        None => (segment, None),
    }
}

fn ensure_method(method: &Method, expected: Method, label: &str) -> Result<(), ProxyError> {
    if *method == expected {
        Ok(())
    } else {
        Err(ProxyError::method_not_allowed(format!(
            "invalid method for {label}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(method: Method, path: &str) -> RouteClass {
        classify_request(&method, path).unwrap()
    }

    #[test]
    fn alt_routes_by_suffix() {
        assert_eq!(
            classify(Method::POST, "/v1/chat/completions"),
            RouteClass::AltChat
        );
        assert_eq!(classify(Method::POST, "/v1/embeddings"), RouteClass::AltEmbed);
        assert_eq!(
            classify(Method::POST, "/v1/images/generations"),
            RouteClass::AltImage
        );
        assert_eq!(classify(Method::GET, "/v1/models"), RouteClass::AltModels);
    }

    #[test]
    fn native_generate_actions_extract_model() {
        assert_eq!(
            classify(Method::POST, "/v1beta/models/gemini-pro:generateContent"),
            RouteClass::Native {
                op: NativeOp::Generate,
                model: Some("gemini-pro".to_string()),
            }
        );
        assert_eq!(
            classify(
                Method::POST,
                "/v1beta/models/gemini-pro:streamGenerateContent"
            ),
            RouteClass::Native {
                op: NativeOp::StreamGenerate,
                model: Some("gemini-pro".to_string()),
            }
        );
    }

    #[test]
    fn native_embed_count_and_image_actions() {
        for (action, op) in [
            ("embedContent", NativeOp::Embed),
            ("batchEmbedContents", NativeOp::BatchEmbed),
            ("countTokens", NativeOp::CountTokens),
            ("generateImageWithGemini", NativeOp::ImageGemini),
            ("generateImageWithImagen", NativeOp::ImageImagen),
        ] {
            assert_eq!(
                classify(Method::POST, &format!("/v1beta/models/m:{action}")),
                RouteClass::Native {
                    op,
                    model: Some("m".to_string()),
                }
            );
        }
    }

    #[test]
    fn native_models_listing_and_metadata() {
        assert_eq!(
            classify(Method::GET, "/v1beta/models"),
            RouteClass::Native {
                op: NativeOp::ListModels,
                model: None,
            }
        );
        assert_eq!(
            classify(Method::GET, "/v1beta/models/gemini-pro"),
            RouteClass::Native {
                op: NativeOp::GetModel,
                model: Some("gemini-pro".to_string()),
            }
        );
    }

    #[test]
    fn tuned_models_are_native() {
        assert_eq!(
            classify(Method::POST, "/v1beta/tunedModels/my-tune:generateContent"),
            RouteClass::Native {
                op: NativeOp::Generate,
                model: Some("my-tune".to_string()),
            }
        );
        assert_eq!(
            classify(Method::GET, "/tunedModels/my-tune"),
            RouteClass::Native {
                op: NativeOp::GetModel,
                model: Some("my-tune".to_string()),
            }
        );
    }

    #[test]
    fn unknown_routes_are_404() {
        assert!(classify_request(&Method::GET, "/nope").is_err());
        assert!(classify_request(&Method::POST, "/v1beta/models/m:doOdd").is_err());
    }

    #[test]
    fn wrong_method_is_405() {
        let err = classify_request(&Method::GET, "/v1/chat/completions").unwrap_err();
        assert_eq!(err.status, http::StatusCode::METHOD_NOT_ALLOWED);
    }
}
