//! Built-in masking rules.
//!
//! Replacements use `regex` expansion syntax (`${1}`), and every replacement
//! is chosen so that its output no longer matches the rule that produced it.

use crate::redactor::MaskingRule;

pub const GDPR: &str = "GDPR";
pub const LGPD: &str = "LGPD";
pub const PCI_DSS: &str = "PCI_DSS";
pub const SOX: &str = "SOX";

struct BuiltinRule {
    name: &'static str,
    pattern: &'static str,
    replacement: &'static str,
    description: &'static str,
    enabled: bool,
    compliance: &'static [&'static str],
}

const BUILTIN_RULES: &[BuiltinRule] = &[
    BuiltinRule {
        name: "cpf",
        pattern: r"\b(\d{3})\d{6}(\d{2})\b",
        replacement: "${1}.XXX.XXX-${2}",
        description: "Brazilian CPF without punctuation",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "cpf_formatted",
        pattern: r"\b(\d{3})\.\d{3}\.\d{3}-(\d{2})\b",
        replacement: "${1}.XXX.XXX-${2}",
        description: "Brazilian CPF in 000.000.000-00 form",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "cnpj",
        pattern: r"\b(\d{2})\d{10}(\d{2})\b",
        replacement: "${1}.XXX.XXX/XXXX-${2}",
        description: "Brazilian CNPJ without punctuation",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "cnpj_formatted",
        pattern: r"\b(\d{2})\.\d{3}\.\d{3}/\d{4}-(\d{2})\b",
        replacement: "${1}.XXX.XXX/XXXX-${2}",
        description: "Brazilian CNPJ in 00.000.000/0000-00 form",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "credit_card",
        pattern: r"\b(\d{4})\s?-?\s?(\d{4})\s?-?\s?(\d{4})\s?-?\s?(\d{4})\b",
        replacement: "${1}-XXXX-XXXX-${4}",
        description: "Payment card numbers, keeps first and last group",
        enabled: true,
        compliance: &[PCI_DSS],
    },
    BuiltinRule {
        name: "api_key_bearer",
        pattern: r"(Bearer\s+)([A-Za-z0-9\-_]{10,})",
        replacement: "${1}***MASKED***",
        description: "Bearer tokens in authorization headers",
        enabled: true,
        compliance: &[SOX],
    },
    BuiltinRule {
        name: "api_key_basic",
        pattern: r"(Basic\s+)([A-Za-z0-9+/]{10,}={0,2})",
        replacement: "${1}***MASKED***",
        description: "Basic authentication credentials",
        enabled: true,
        compliance: &[SOX],
    },
    BuiltinRule {
        name: "jwt_token",
        pattern: r"\beyJ[A-Za-z0-9\-_]+\.eyJ[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_.+/=]+",
        replacement: "***JWT_TOKEN_MASKED***",
        description: "JSON Web Tokens",
        enabled: true,
        compliance: &[SOX],
    },
    BuiltinRule {
        name: "password_field",
        pattern: r#"("password"\s*:\s*")([^"]+)(")"#,
        replacement: "${1}***MASKED***${3}",
        description: "Password fields in JSON payloads",
        enabled: true,
        compliance: &[SOX, GDPR],
    },
    BuiltinRule {
        name: "password_query",
        pattern: r"([?&]password=)([^&\s]+)",
        replacement: "${1}***MASKED***",
        description: "Password parameters in query strings",
        enabled: true,
        compliance: &[SOX],
    },
    BuiltinRule {
        name: "email",
        pattern: r"\b(\w{3})\w*(@[\w-]+(?:\.[\w-]+)+)\b",
        replacement: "${1}***${2}",
        description: "Email addresses, keeps the first three characters and the domain",
        enabled: true,
        compliance: &[GDPR, LGPD],
    },
    BuiltinRule {
        name: "phone_br",
        pattern: r"\b(\d{2})\d{4,5}(\d{4})\b",
        replacement: "${1}*****${2}",
        description: "Brazilian phone numbers without punctuation",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "phone_br_formatted",
        pattern: r"(\(\d{2}\))\s?\d{4,5}-\d{4}\b",
        replacement: "${1} XXXXX-XXXX",
        description: "Brazilian phone numbers in (00) 00000-0000 form",
        enabled: true,
        compliance: &[LGPD],
    },
    BuiltinRule {
        name: "phone_international",
        pattern: r"\+(\d{1,3})\s?(\d{2,3})\s?\d{6,8}\b",
        replacement: "+${1} ${2} ******",
        description: "International phone numbers",
        enabled: true,
        compliance: &[GDPR],
    },
    BuiltinRule {
        name: "ipv4",
        pattern: r"\b(\d{1,3}\.\d{1,3})\.\d{1,3}\.\d{1,3}\b",
        replacement: "${1}.XXX.XXX",
        description: "IPv4 addresses, keeps the first two octets",
        enabled: false,
        compliance: &[GDPR],
    },
    BuiltinRule {
        name: "bank_account",
        pattern: r"\b(\d{4,6})-(\d)(\d{6,12})-(\d)\b",
        replacement: "${1}-${2}XXXXXX-${4}",
        description: "Bank agency and account numbers",
        enabled: true,
        compliance: &[PCI_DSS, LGPD],
    },
    BuiltinRule {
        name: "ssn",
        pattern: r"\b(\d{3})-?(\d{2})-?(\d{4})\b",
        replacement: "${1}-XX-${3}",
        description: "US social security numbers",
        enabled: true,
        compliance: &[GDPR],
    },
    BuiltinRule {
        name: "secret_key",
        pattern: r#"("(?:secret|key|token|password)"\s*:\s*")([^"]+)(")"#,
        replacement: "${1}***MASKED***${3}",
        description: "Generic secret fields in JSON payloads",
        enabled: true,
        compliance: &[SOX],
    },
];

/// The default rule set, in application order.
#[must_use]
pub fn default_rules() -> Vec<MaskingRule> {
    BUILTIN_RULES
        .iter()
        .map(|builtin| MaskingRule {
            name: builtin.name.to_string(),
            pattern: builtin.pattern.to_string(),
            replacement: builtin.replacement.to_string(),
            description: builtin.description.to_string(),
            enabled: builtin.enabled,
            compliance: builtin.compliance.iter().map(|tag| (*tag).to_string()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_builtin_patterns_compile() {
        for rule in default_rules() {
            assert!(Regex::new(&rule.pattern).is_ok(), "rule {} does not compile", rule.name);
        }
    }

    #[test]
    fn test_rule_names_are_unique() {
        let rules = default_rules();
        let mut names: Vec<_> = rules.iter().map(|rule| rule.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), rules.len());
    }

    #[test]
    fn test_only_ipv4_disabled_by_default() {
        let disabled: Vec<_> = default_rules()
            .into_iter()
            .filter(|rule| !rule.enabled)
            .map(|rule| rule.name)
            .collect();
        assert_eq!(disabled, vec!["ipv4".to_string()]);
    }
}
