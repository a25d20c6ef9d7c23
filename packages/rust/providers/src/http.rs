//! Shared HTTP plumbing: client construction, status classification, and
//! SSRF protection for fetched URLs.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use url::Url;

use smartadmit_shared::{Result, SmartAdmitError};

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("SmartAdmit/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the given timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| SmartAdmitError::Network(format!("failed to build HTTP client: {e}")))
}

/// Maximum redirect hops followed by the page fetcher.
pub(crate) const MAX_REDIRECTS: usize = 5;

/// Build the page-fetch client. Unless `allow_private` is set, every redirect
/// hop is re-checked against [`is_ssrf_target`].
pub(crate) fn build_fetch_client(timeout: Duration, allow_private: bool) -> Result<Client> {
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        let hops = attempt.previous().len();
        if hops >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private && is_ssrf_target(attempt.url()) {
            let message = format!("redirect to non-public URL {}", attempt.url());
            attempt.error(message)
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .timeout(timeout)
        .build()
        .map_err(|e| SmartAdmitError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success status to an error. Rate limits and server errors are
/// `Network` (retryable); everything else is attributed to the provider.
pub(crate) fn status_error(
    status: StatusCode,
    body: &str,
    provider_error: fn(String) -> SmartAdmitError,
) -> SmartAdmitError {
    let snippet: String = body.chars().take(300).collect();
    let message = format!("HTTP {}: {snippet}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SmartAdmitError::Network(message)
    } else {
        provider_error(message)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 (link local)
                || (first & 0xffc0) == 0xfe80
        }
    }
}
