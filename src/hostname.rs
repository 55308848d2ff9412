//! Host name verification, independent of whether the chain is trusted.

use std::net::IpAddr;

use rustls::Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

/// Checks that `leaf` is issued for `host`.
///
/// When the certificate carries DNS or IP subject alternative names only those
/// are matched, and the subject is ignored. Otherwise the host is matched
/// against the subject common name(s), which is all many older self-signed
/// mail server certificates have. IP literals only match IP names, wildcards
/// cover exactly the left-most label, and comparison is case-insensitive.
pub fn verify_hostname(leaf: &Certificate, host: &str) -> Result<(), String> {
    let (_, cert) = parse_x509_certificate(&leaf.0)
        .map_err(|e| format!("unparsable certificate: {}", e))?;

    let has_alternative_names = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::DNSName(_) | GeneralName::IPAddress(_))),
        Ok(None) => false,
        Err(e) => return Err(format!("malformed subject alternative names: {}", e)),
    };
    if has_alternative_names {
        return verify_alternative_names(leaf, host);
    }

    let mut common_names = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .peekable();
    if common_names.peek().is_none() {
        return Err(format!("certificate names no host, expected {}", host));
    }
    if common_names.any(|cn| common_name_matches(cn, host)) {
        Ok(())
    } else {
        Err(format!("certificate subject does not name {}", host))
    }
}

fn verify_alternative_names(leaf: &Certificate, host: &str) -> Result<(), String> {
    let cert = webpki::EndEntityCert::try_from(leaf.0.as_slice())
        .map_err(|e| format!("unparsable certificate: {:?}", e))?;
    let name = webpki::SubjectNameRef::try_from_ascii_str(host)
        .map_err(|_| format!("invalid host name {:?}", host))?;
    cert.verify_is_valid_for_subject_name(name)
        .map_err(|e| format!("certificate not valid for {}: {:?}", host, e))
}

fn common_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if let Ok(ip) = host.parse::<IpAddr>() {
        return pattern.parse::<IpAddr>().map_or(false, |p| p == ip);
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix && suffix.contains('.'),
            None => false,
        },
        None => pattern == host,
    }
}
