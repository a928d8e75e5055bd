//! Static provider definitions and runtime templates

use fleet_core::types::RuntimeContract;
use serde::{Deserialize, Serialize};

/// Input kind of a credential field, drives masking in clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFieldKind {
    Text,
    Password,
    Textarea,
}

/// One credential field a provider requires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthField {
    pub key: String,
    pub label: String,
    pub kind: AuthFieldKind,
    pub required: bool,
}

impl AuthField {
    fn required(key: &str, label: &str, kind: AuthFieldKind) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind,
            required: true,
        }
    }
}

/// Static capability advertisement for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub auth_fields: Vec<AuthField>,
    pub required_permissions: Vec<String>,
    pub token_guidance: String,
    pub regions: Vec<String>,
    pub gpu_types: Vec<String>,
}

/// Public summary of a provider, safe to expose over the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub auth_fields: Vec<AuthField>,
    pub required_permissions: Vec<String>,
    pub token_guidance: String,
}

impl ProviderDefinition {
    fn new(
        id: &str,
        name: &str,
        description: &str,
        auth_fields: Vec<AuthField>,
        required_permissions: &[&str],
        token_guidance: &str,
        regions: &[&str],
        gpu_types: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            auth_fields,
            required_permissions: required_permissions.iter().map(|s| s.to_string()).collect(),
            token_guidance: token_guidance.to_string(),
            regions: regions.iter().map(|s| s.to_string()).collect(),
            gpu_types: gpu_types.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Public view without regions/GPU catalogs
    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            auth_fields: self.auth_fields.clone(),
            required_permissions: self.required_permissions.clone(),
            token_guidance: self.token_guidance.clone(),
        }
    }
}

/// The built-in provider catalog
pub fn builtin_definitions() -> Vec<ProviderDefinition> {
    use AuthFieldKind::{Password, Text, Textarea};

    vec![
        ProviderDefinition::new(
            "kaggle",
            "Kaggle",
            "Free notebooks with quota-limited GPUs",
            vec![
                AuthField::required("KAGGLE_USERNAME", "Kaggle Username", Text),
                AuthField::required("KAGGLE_KEY", "Kaggle API Key", Password),
            ],
            &["notebooks.read", "notebooks.write"],
            "Use a project-scoped key with notebook-only access where possible.",
            &["us"],
            &["T4"],
        ),
        ProviderDefinition::new(
            "colab",
            "Google Colab",
            "Colab-backed runtime credentials",
            vec![AuthField::required(
                "COLAB_ACCESS_TOKEN",
                "Colab Access Token",
                Password,
            )],
            &["runtime.connect", "drive.read"],
            "Prefer short-lived Colab tokens over long-lived account credentials.",
            &["global"],
            &["T4", "L4", "A100"],
        ),
        ProviderDefinition::new(
            "aws",
            "AWS",
            "EC2 GPU instances for inference",
            vec![
                AuthField::required("AWS_ACCESS_KEY_ID", "Access Key ID", Text),
                AuthField::required("AWS_SECRET_ACCESS_KEY", "Secret Access Key", Password),
            ],
            &[
                "ec2:DescribeInstances",
                "ec2:RunInstances",
                "ec2:StartInstances",
                "ec2:StopInstances",
                "ec2:TerminateInstances",
            ],
            "Use short-lived STS credentials from an IAM role with least privilege.",
            &["us-east-1", "us-west-2", "eu-west-1", "ap-southeast-1"],
            &["T4", "A10G", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "azure",
            "Azure",
            "Azure GPU VM and Azure ML compute",
            vec![
                AuthField::required("AZURE_TENANT_ID", "Tenant ID", Text),
                AuthField::required("AZURE_CLIENT_ID", "Client ID", Text),
                AuthField::required("AZURE_CLIENT_SECRET", "Client Secret", Password),
                AuthField::required("AZURE_SUBSCRIPTION_ID", "Subscription ID", Text),
            ],
            &[
                "Microsoft.Compute/virtualMachines/read",
                "Microsoft.Compute/virtualMachines/write",
                "Microsoft.Resources/subscriptions/resourceGroups/read",
            ],
            "Use a service principal scoped to a dedicated resource group.",
            &["eastus", "westus3", "westeurope", "southeastasia"],
            &["T4", "A10", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "gcp",
            "Google Cloud",
            "Compute Engine / Vertex AI GPU runtimes",
            vec![
                AuthField::required("GCP_PROJECT_ID", "Project ID", Text),
                AuthField::required("GCP_SERVICE_ACCOUNT_JSON", "Service Account JSON", Textarea),
            ],
            &[
                "compute.instances.get",
                "compute.instances.create",
                "compute.instances.start",
                "compute.instances.stop",
                "compute.instances.delete",
            ],
            "Use Workload Identity Federation or short-lived service account tokens.",
            &["us-central1", "us-west4", "europe-west4", "asia-south1"],
            &["T4", "L4", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "runpod",
            "RunPod",
            "On-demand and serverless GPU",
            vec![AuthField::required("RUNPOD_API_KEY", "RunPod API Key", Password)],
            &["pods.read", "pods.write"],
            "Use org/project-scoped API keys when available.",
            &["us", "eu"],
            &["A4000", "A5000", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "lambdalabs",
            "Lambda Cloud",
            "GPU cloud optimized for ML workloads",
            vec![AuthField::required("LAMBDA_API_KEY", "Lambda API Key", Password)],
            &["instances.read", "instances.write"],
            "Use workspace-scoped API key with instance lifecycle permissions only.",
            &["us-west", "us-east"],
            &["A10", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "vastai",
            "Vast.ai",
            "Marketplace GPU instances",
            vec![AuthField::required("VAST_API_KEY", "Vast API Key", Password)],
            &["instances.read", "instances.write"],
            "Use a dedicated API key limited to instance management.",
            &["global"],
            &["RTX4090", "A6000", "A100", "H100"],
        ),
        ProviderDefinition::new(
            "selfhosted",
            "Self-hosted SSH",
            "Use your own GPU machine over SSH",
            vec![
                AuthField::required("SSH_HOST", "SSH Host", Text),
                AuthField::required("SSH_USER", "SSH User", Text),
                AuthField::required("SSH_PRIVATE_KEY", "SSH Private Key", Textarea),
            ],
            &["ssh.connect", "docker.run"],
            "Prefer ephemeral SSH certificates or short-lived keys.",
            &["custom"],
            &["T4", "L4", "A10", "A100", "H100", "RTX4090"],
        ),
    ]
}

/// Runtime container template with its wire contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTemplate {
    pub id: String,
    pub name: String,
    pub image: String,
    pub contract: RuntimeContract,
}

fn contract(health: &str, inference: &str, preload: &str) -> RuntimeContract {
    RuntimeContract {
        health_path: health.to_string(),
        inference_path: inference.to_string(),
        preload_path: preload.to_string(),
        error_format: serde_json::json!({
            "code": "string",
            "message": "string",
            "details": "object",
            "retriable": "boolean",
        }),
    }
}

/// The built-in runtime template catalog
pub fn builtin_runtime_templates() -> Vec<RuntimeTemplate> {
    vec![
        RuntimeTemplate {
            id: "vllm".to_string(),
            name: "vLLM".to_string(),
            image: "vllm/vllm-openai:latest".to_string(),
            contract: contract("/health", "/v1/chat/completions", "/v1/models/preload"),
        },
        RuntimeTemplate {
            id: "tgi".to_string(),
            name: "Text Generation Inference".to_string(),
            image: "ghcr.io/huggingface/text-generation-inference:latest".to_string(),
            contract: contract("/health", "/generate", "/models/preload"),
        },
        RuntimeTemplate {
            id: "ollama".to_string(),
            name: "Ollama-compatible".to_string(),
            image: "ollama/ollama:latest".to_string(),
            contract: contract("/api/tags", "/api/generate", "/api/pull"),
        },
        RuntimeTemplate {
            id: "custom".to_string(),
            name: "Custom container".to_string(),
            image: "custom/runtime:latest".to_string(),
            contract: contract("/health", "/inference", "/preload"),
        },
    ]
}

/// Caller-supplied runtime deployment request; unset fields fall back to
/// the template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub template_id: Option<String>,
    pub image: Option<String>,
    pub model: Option<String>,
    pub health_path: Option<String>,
    pub inference_path: Option<String>,
    pub preload_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_all_providers() {
        let defs = builtin_definitions();
        let ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        for expected in [
            "kaggle",
            "colab",
            "aws",
            "azure",
            "gcp",
            "runpod",
            "lambdalabs",
            "vastai",
            "selfhosted",
        ] {
            assert!(ids.contains(&expected), "missing provider {}", expected);
        }
    }

    #[test]
    fn test_every_provider_has_required_fields() {
        for def in builtin_definitions() {
            assert!(!def.auth_fields.is_empty(), "{} has no auth fields", def.id);
            assert!(
                def.auth_fields.iter().any(|f| f.required),
                "{} has no required field",
                def.id
            );
            assert!(!def.regions.is_empty());
            assert!(!def.gpu_types.is_empty());
            assert!(!def.required_permissions.is_empty());
        }
    }

    #[test]
    fn test_runtime_templates() {
        let templates = builtin_runtime_templates();
        assert_eq!(templates.len(), 4);

        let vllm = templates.iter().find(|t| t.id == "vllm").unwrap();
        assert_eq!(vllm.contract.health_path, "/health");
        assert_eq!(vllm.contract.inference_path, "/v1/chat/completions");

        let ollama = templates.iter().find(|t| t.id == "ollama").unwrap();
        assert_eq!(ollama.contract.health_path, "/api/tags");
    }

    #[test]
    fn test_provider_info_hides_catalogs() {
        let def = &builtin_definitions()[0];
        let info = def.info();
        assert_eq!(info.id, def.id);
        let serialized = serde_json::to_value(&info).unwrap();
        assert!(serialized.get("regions").is_none());
        assert!(serialized.get("gpu_types").is_none());
    }
}
