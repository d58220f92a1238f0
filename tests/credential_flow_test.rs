//! Integration tests for the credential lifecycle.
//!
//! Exercises the cache, the single-flight guarantee, and tenant resolution
//! across module boundaries the way a dispatcher would drive them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use afip_ws::config::{MasterConfig, MasterConfigResolver, Mode, TenantConfig};
use afip_ws::credentials::{CacheKey, CredentialCache, Credentials};
use afip_ws::error::{AfipError, AuthError};
use afip_ws::wsfe::invoice::InvoiceType;
use chrono::Utc;

fn ticket(token: &str) -> Credentials {
    Credentials {
        token: token.to_owned(),
        sign: "sign".to_owned(),
        expires_at: Utc::now() + chrono::Duration::hours(12),
    }
}

fn key() -> CacheKey {
    CacheKey { cuit: 20_111_111_112, mode: Mode::Sandbox }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_share_one_authentication() {
    let cache = Arc::new(CredentialCache::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_authenticate(key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(ticket("shared"))
                })
                .await
        }));
    }

    for handle in handles {
        let credentials = handle.await.expect("task panicked").expect("authentication failed");
        assert_eq!(credentials.token, "shared");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one flight must run");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_flight_is_shared_then_cleared_for_retry() {
    let cache = Arc::new(CredentialCache::new());
    let calls = Arc::new(AtomicUsize::new(0));

    // Two waiters attach to the same failing flight.
    let mut handles = Vec::new();
    for _ in 0..2 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_authenticate(key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(AfipError::Auth(AuthError::Transient("login service down".into())))
                })
                .await
        }));
    }
    for handle in handles {
        let err = handle.await.expect("task panicked").expect_err("flight should fail");
        assert!(matches!(err, AfipError::Auth(AuthError::Transient(_))));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The failed flight does not poison the key: the next call starts fresh.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let credentials = cache
        .get_or_authenticate(key(), || async { Ok(ticket("second-attempt")) })
        .await
        .expect("retry should succeed");
    assert_eq!(credentials.token, "second-attempt");
}

#[tokio::test]
async fn populated_ticket_short_circuits_authentication() {
    let cache = CredentialCache::new();

    // Operator recovery path: a ticket obtained out of band is handed to the
    // cache directly, e.g. after the login service reported an existing one.
    cache.populate(key(), ticket("out-of-band"));

    let credentials = cache
        .get_or_authenticate(key(), || async {
            panic!("authenticator must not run for a cached ticket");
            #[allow(unreachable_code)]
            Ok(ticket("unused"))
        })
        .await
        .expect("cached ticket expected");
    assert_eq!(credentials.token, "out-of-band");
}

#[tokio::test]
async fn invalidation_forces_a_fresh_flight() {
    let cache = CredentialCache::new();
    cache.populate(key(), ticket("stale"));
    cache.invalidate(&key());
    assert!(cache.get(&key()).is_none());

    let credentials = cache
        .get_or_authenticate(key(), || async { Ok(ticket("fresh")) })
        .await
        .expect("reauthentication should succeed");
    assert_eq!(credentials.token, "fresh");
}

#[tokio::test]
async fn distinct_identities_do_not_share_tickets() {
    let cache = CredentialCache::new();
    let sandbox = CacheKey { cuit: 20_111_111_112, mode: Mode::Sandbox };
    let production = CacheKey { cuit: 20_111_111_112, mode: Mode::Production };

    cache.populate(sandbox, ticket("sandbox"));
    assert!(cache.get(&production).is_none());

    cache.populate(production, ticket("production"));
    assert_eq!(cache.get(&sandbox).map(|c| c.token), Some("sandbox".to_owned()));
    assert_eq!(cache.get(&production).map(|c| c.token), Some("production".to_owned()));
}

#[test]
fn resolver_routes_tenants_to_master_identities() {
    let shared = MasterConfig::new(20_111_111_112, Mode::Sandbox, b"cert".to_vec(), b"key".to_vec());
    let dedicated = MasterConfig::new(27_222_222_223, Mode::Sandbox, b"cert2".to_vec(), b"key2".to_vec());
    let resolver = MasterConfigResolver::new(shared).with_override(30_333_333_334, dedicated);

    let plain = TenantConfig {
        cuit: 23_444_444_445,
        point_of_sale: 1,
        default_invoice_type: InvoiceType::B,
        enabled: true,
    };
    let resolved = resolver.resolve(&plain).expect("shared identity expected");
    assert_eq!(resolved.cuit, 20_111_111_112);

    let overridden = TenantConfig {
        cuit: 30_333_333_334,
        point_of_sale: 2,
        default_invoice_type: InvoiceType::B,
        enabled: true,
    };
    let resolved = resolver.resolve(&overridden).expect("dedicated identity expected");
    assert_eq!(resolved.cuit, 27_222_222_223);

    let disabled = TenantConfig {
        cuit: 23_444_444_445,
        point_of_sale: 1,
        default_invoice_type: InvoiceType::B,
        enabled: false,
    };
    let err = resolver.resolve(&disabled).expect_err("disabled tenant must be rejected");
    assert!(matches!(err, AfipError::InvalidRequest(_)));
}
