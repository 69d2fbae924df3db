use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Pong {
    pub now: u64,
    pub status: &'static str,
    pub ns1: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelCatalog {
    pub data: Vec<ModelDescriptor>,
    pub object: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelDescriptor {
    pub capabilities: ModelCapabilities,
    pub id: &'static str,
    pub name: &'static str,
    pub object: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelCapabilities {
    pub family: &'static str,
    pub object: &'static str,
    #[serde(rename = "type")]
    pub capability_type: &'static str,
}

// (id, name, version, family, type)
const CATALOG: [(&str, &str, &str, &str, &str); 9] = [
    ("gpt-3.5-turbo", "GPT 3.5 Turbo", "gpt-3.5-turbo-0613", "gpt-3.5-turbo", "chat"),
    (
        "gpt-3.5-turbo-0613",
        "GPT 3.5 Turbo (2023-06-13)",
        "gpt-3.5-turbo-0613",
        "gpt-3.5-turbo",
        "chat",
    ),
    ("gpt-4", "GPT 4", "gpt-4-0613", "gpt-4", "chat"),
    ("gpt-4-0613", "GPT 4 (2023-06-13)", "gpt-4-0613", "gpt-4", "chat"),
    (
        "gpt-4-0125-preview",
        "GPT 4 Turbo (2024-01-25 Preview)",
        "gpt-4-0125-preview",
        "gpt-4-turbo",
        "chat",
    ),
    (
        "text-embedding-ada-002",
        "Embedding V2 Ada",
        "text-embedding-ada-002",
        "text-embedding-ada-002",
        "embeddings",
    ),
    (
        "text-embedding-ada-002-index",
        "Embedding V2 Ada (Index)",
        "text-embedding-ada-002",
        "text-embedding-ada-002",
        "embeddings",
    ),
    (
        "text-embedding-3-small",
        "Embedding V3 small",
        "text-embedding-3-small",
        "text-embedding-3-small",
        "embeddings",
    ),
    (
        "text-embedding-3-small-inference",
        "Embedding V3 small (Inference)",
        "text-embedding-3-small",
        "text-embedding-3-small",
        "embeddings",
    ),
];

impl ModelCatalog {
    pub fn builtin() -> Self {
        let data = CATALOG
            .iter()
            .map(|&(id, name, version, family, capability_type)| ModelDescriptor {
                capabilities: ModelCapabilities {
                    family,
                    object: "model_capabilities",
                    capability_type,
                },
                id,
                name,
                object: "model",
                version,
            })
            .collect();
        Self {
            data,
            object: "list",
        }
    }
}
