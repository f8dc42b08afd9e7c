// Intent routing
// Delivery and order-status questions are answered with a fixed support reply;
// everything else goes to retrieval


use fancy_regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const SUPPORT_ROUTE: &str = "support";

const DELIVERY_PATTERNS: &[&str] = &[
    "entrega",
    "pedido",
    "envio",
    "rastreamento",
    "rastrear",
    "status",
    "saiu para entrega",
    "quando chega",
    "quando vai chegar",
    "demora",
    "atraso",
    "prazo de entrega",
    "frete",
    "transportadora",
    "correio",
    "jadlog",
    "meu produto",
    "minha compra",
    "já foi enviado",
    "quanto tempo",
    "onde está",
];

// Accepts both "tem" and "têm"
const PRODUCT_PATTERNS: &[&str] = &[
    "quais produtos",
    "o que vende",
    "t[eê]m vidro",
    "t[eê]m espelho",
    "preço",
    "valor",
    "catálogo",
    "lista de produtos",
];

static DELIVERY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){}", DELIVERY_PATTERNS.join("|"))).expect("valid regex")
});

static PRODUCT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){}", PRODUCT_PATTERNS.join("|"))).expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Support,
    Retrieval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedReply {
    pub response: String,
    pub routed_to: &'static str,
}

/// Decides whether a message needs retrieval or a canned support reply
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Intent;

    fn support_reply(&self) -> String;

    #[inline]
    fn route(&self, message: &str) -> Option<RoutedReply> {
        match self.classify(message) {
            Intent::Support => {
                let preview: String = message.chars().take(50).collect();
                info!("Routing to support: {}...", preview);
                Some(RoutedReply {
                    response: self.support_reply(),
                    routed_to: SUPPORT_ROUTE,
                })
            }
            Intent::Retrieval => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegexIntentRouter {
    support_email: String,
}

impl RegexIntentRouter {
    #[inline]
    pub fn new(support_email: impl Into<String>) -> Self {
        Self {
            support_email: support_email.into(),
        }
    }

    #[inline]
    pub fn support_email(&self) -> &str {
        &self.support_email
    }

    fn matches(regex: &Regex, message: &str) -> bool {
        regex.is_match(message).unwrap_or_else(|e| {
            warn!("Intent pattern failed on message: {}", e);
            false
        })
    }
}

impl IntentClassifier for RegexIntentRouter {
    /// Support iff a delivery pattern matches and no product pattern does
    #[inline]
    fn classify(&self, message: &str) -> Intent {
        let has_delivery = Self::matches(&DELIVERY_REGEX, message);
        let has_product = Self::matches(&PRODUCT_REGEX, message);

        if has_delivery && !has_product {
            Intent::Support
        } else {
            Intent::Retrieval
        }
    }

    #[inline]
    fn support_reply(&self) -> String {
        format!(
            "Para consultas sobre entrega de produtos, status de pedidos ou situação de entrega, \
             por favor entre em contato com nosso suporte:\n\n\
             📧 Email: {}\n\n\
             Nossa equipe terá prazer em ajudá-lo com informações específicas sobre seu pedido e entrega.\n\n\
             Para agilizar o atendimento, tenha em mãos:\n\
             - Número do pedido\n\
             - CPF/CNPJ do cadastro\n\
             - Data da compra\n",
            self.support_email
        )
    }
}
