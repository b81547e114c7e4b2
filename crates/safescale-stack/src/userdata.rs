//! Phase-1 cloud-init rendering.
//!
//! The first boot of a host runs a small cloud-init payload that creates
//! the operator account, installs the key pair and opens the door for the
//! later provisioning phases. The payload is rendered from a template with
//! `{{NAME}}` placeholders; rendering fails on a placeholder with no
//! value so a half-rendered script never reaches a host.

use std::collections::HashMap;

use safescale_core::{Error, Result};
use safescale_store::types::HostRequest;

const PHASE1_TEMPLATE: &str = r"#!/bin/bash
# SafeScale phase-1 bootstrap
set -euo pipefail

useradd --create-home --shell /bin/bash {{OperatorUsername}} || true
mkdir -p /home/{{OperatorUsername}}/.ssh
cat >>/home/{{OperatorUsername}}/.ssh/authorized_keys <<'EOF'
{{PublicKey}}
EOF
chown -R {{OperatorUsername}}: /home/{{OperatorUsername}}/.ssh
chmod 0700 /home/{{OperatorUsername}}/.ssh
echo '{{OperatorUsername}} ALL=(ALL) NOPASSWD:ALL' >/etc/sudoers.d/90-safescale

echo '{{HostName}}' >/etc/hostname
hostname '{{HostName}}'
echo 'safescale network {{CIDR}}' >/etc/safescale-network
";

/// Substitute `{{NAME}}` placeholders in `template`.
///
/// # Errors
///
/// Returns `Syntax` when a placeholder has no value in `variables` or is
/// unterminated.
pub fn render(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::syntax("unterminated placeholder in template"));
        };
        let name = &after[..end];
        match variables.get(name) {
            Some(value) => output.push_str(value),
            None => {
                return Err(Error::syntax(format!(
                    "no value for placeholder '{name}'"
                )))
            }
        }
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

/// Render the phase-1 cloud-init payload for a host.
///
/// # Errors
///
/// Returns `InvalidParameter` when the request carries no key pair yet.
pub fn phase1(operator: &str, request: &HostRequest, cidr: &str) -> Result<String> {
    let key_pair = request.key_pair.as_ref().ok_or_else(|| {
        Error::invalid_parameter("request.key_pair must be resolved before rendering user data")
    })?;
    let variables = HashMap::from([
        ("OperatorUsername".to_string(), operator.to_string()),
        ("PublicKey".to_string(), key_pair.public_key.clone()),
        ("HostName".to_string(), request.resource_name.clone()),
        ("CIDR".to_string(), cidr.to_string()),
    ]);
    render(PHASE1_TEMPLATE, &variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_store::types::KeyPair;

    #[test]
    fn render_substitutes_every_placeholder() {
        let vars = HashMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]);
        assert_eq!(render("{{A}}-{{B}}-{{A}}", &vars).unwrap(), "1-2-1");
    }

    #[test]
    fn render_rejects_unknown_placeholder() {
        let err = render("{{Missing}}", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), safescale_core::ErrorKind::Syntax);
    }

    #[test]
    fn render_rejects_unterminated_placeholder() {
        assert!(render("{{Broken", &HashMap::new()).is_err());
    }

    #[test]
    fn phase1_embeds_operator_and_cidr() {
        let request = HostRequest {
            resource_name: "c1-master-1".into(),
            key_pair: Some(KeyPair {
                public_key: "ssh-rsa AAAA test".into(),
                ..KeyPair::default()
            }),
            ..HostRequest::default()
        };
        let payload = phase1("safescale", &request, "10.42.0.0/16").unwrap();
        assert!(payload.contains("useradd --create-home --shell /bin/bash safescale"));
        assert!(payload.contains("ssh-rsa AAAA test"));
        assert!(payload.contains("10.42.0.0/16"));
        assert!(!payload.contains("{{"));
    }
}
