//! Storage round-trip ceilings for the authentication flows.
//!
//! Every repository call is a potential network hop in production, so the
//! flows keep hard budgets: 6 calls for a plain sign-up, 8 when automatic
//! linking engages, 12 when a session user is involved.

use std::sync::Arc;

use ligilo::policy::{LinkIfVerified, LinkWithoutVerification, LinkingDisabled, LinkingOptions, LinkingPolicy};
use ligilo::recipes::{
    ConsumeCodeOutcome, CreateCodeOutcome, EmailPassword, Passwordless, PasswordlessContact,
    Sha256PasswordHasher, SignInUpOutcome, SignUpOutcome, ThirdParty,
};
use ligilo::repo::{CountingRepository, InMemoryRepository, UserRepository};
use ligilo::{AccountLinker, SessionRef, User};

struct Engine {
    counting: Arc<CountingRepository>,
    emailpassword: EmailPassword,
    thirdparty: ThirdParty,
    passwordless: Passwordless,
}

fn engine(policy: Arc<dyn LinkingPolicy>) -> Engine {
    let inner: Arc<dyn UserRepository> = Arc::new(InMemoryRepository::new());
    let counting = Arc::new(CountingRepository::new(inner));
    let linker = AccountLinker::new(counting.clone(), policy);
    Engine {
        counting,
        emailpassword: EmailPassword::new(linker.clone(), Arc::new(Sha256PasswordHasher)),
        thirdparty: ThirdParty::new(linker.clone()),
        passwordless: Passwordless::new(linker),
    }
}

#[tokio::test]
async fn plain_sign_up_stays_within_six_calls() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkingDisabled));
    let outcome = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", None, None, &LinkingOptions::default())
        .await?;
    assert!(matches!(outcome, SignUpOutcome::Ok { .. }));
    let calls = engine.counting.calls();
    assert!(calls <= 6, "sign-up used {calls} repository calls");
    Ok(())
}

#[tokio::test]
async fn sign_up_with_automatic_linking_stays_within_eight_calls() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkWithoutVerification));
    let outcome = engine
        .thirdparty
        .sign_in_up(
            "public",
            "google",
            "abcd",
            "a@example.com",
            true,
            None,
            None,
            &LinkingOptions::default(),
        )
        .await?;
    assert!(matches!(outcome, SignInUpOutcome::Ok { .. }));

    engine.counting.reset();
    let outcome = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", None, None, &LinkingOptions::default())
        .await?;
    let SignUpOutcome::Ok { user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    assert_eq!(user.login_methods.len(), 2);
    let calls = engine.counting.calls();
    assert!(calls <= 8, "linked sign-up used {calls} repository calls");
    Ok(())
}

#[tokio::test]
async fn session_linked_factor_stays_within_twelve_calls() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let created = engine
        .passwordless
        .create_code("public", PasswordlessContact::Email("s@example.com".to_string()), None, None, &opts)
        .await?;
    let CreateCodeOutcome::Ok { device_id, code } = created else {
        anyhow::bail!("expected code, got {created:?}");
    };
    let consumed = engine
        .passwordless
        .consume_code("public", device_id, &code, None, None, &opts)
        .await?;
    let ConsumeCodeOutcome::Ok { user: session_user, .. } = consumed else {
        anyhow::bail!("expected ok, got {consumed:?}");
    };
    let session = SessionRef {
        user_id: session_user.id,
        recipe_user_id: session_user.login_methods[0].recipe_user_id,
        expires_at: i64::MAX,
    };

    engine.counting.reset();
    let created = engine
        .passwordless
        .create_code(
            "public",
            PasswordlessContact::Email("fresh@example.com".to_string()),
            Some(&session),
            Some(true),
            &opts,
        )
        .await?;
    let CreateCodeOutcome::Ok { device_id, code } = created else {
        anyhow::bail!("expected code, got {created:?}");
    };
    let consumed = engine
        .passwordless
        .consume_code("public", device_id, &code, Some(&session), Some(true), &opts)
        .await?;
    let ConsumeCodeOutcome::Ok { user, .. } = consumed else {
        anyhow::bail!("expected ok, got {consumed:?}");
    };
    assert_linked(&user, &session_user);
    let calls = engine.counting.calls();
    assert!(calls <= 12, "session factor flow used {calls} repository calls");
    Ok(())
}

fn assert_linked(user: &User, session_user: &User) {
    assert_eq!(user.id, session_user.id);
    assert_eq!(user.login_methods.len(), 2);
}
