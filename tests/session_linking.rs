//! Session-priority linking and the session-linking intent flag.

use std::sync::Arc;

use ligilo::policy::{LinkIfVerified, LinkingOptions, LinkingPolicy};
use ligilo::recipes::{
    ConsumeCodeOutcome, CreateCodeOutcome, EmailPassword, Passwordless, PasswordlessContact,
    Sha256PasswordHasher, SignInUpOutcome, SignUpOutcome, ThirdParty,
};
use ligilo::repo::InMemoryRepository;
use ligilo::{AccountLinker, EngineError, SessionError, SessionRef, User, EMAIL_VERIFIED_CLAIM_ID};

struct Engine {
    emailpassword: EmailPassword,
    thirdparty: ThirdParty,
    passwordless: Passwordless,
}

fn engine(policy: Arc<dyn LinkingPolicy>) -> Engine {
    let repo = Arc::new(InMemoryRepository::new());
    let linker = AccountLinker::new(repo, policy);
    Engine {
        emailpassword: EmailPassword::new(linker.clone(), Arc::new(Sha256PasswordHasher)),
        thirdparty: ThirdParty::new(linker.clone()),
        passwordless: Passwordless::new(linker),
    }
}

fn session_for(user: &User) -> SessionRef {
    SessionRef {
        user_id: user.id,
        recipe_user_id: user.login_methods[0].recipe_user_id,
        expires_at: i64::MAX,
    }
}

fn expired_session_for(user: &User) -> SessionRef {
    SessionRef {
        user_id: user.id,
        recipe_user_id: user.login_methods[0].recipe_user_id,
        expires_at: 0,
    }
}

async fn passwordless_user(engine: &Engine, email: &str, options: &LinkingOptions) -> anyhow::Result<User> {
    let created = engine
        .passwordless
        .create_code("public", PasswordlessContact::Email(email.to_string()), None, None, options)
        .await?;
    let CreateCodeOutcome::Ok { device_id, code } = created else {
        anyhow::bail!("expected code, got {created:?}");
    };
    let consumed = engine
        .passwordless
        .consume_code("public", device_id, &code, None, None, options)
        .await?;
    match consumed {
        ConsumeCodeOutcome::Ok { user, .. } => Ok(user),
        other => anyhow::bail!("expected ok, got {other:?}"),
    }
}

async fn thirdparty_user(engine: &Engine, provider_user_id: &str, email: &str) -> anyhow::Result<User> {
    let outcome = engine
        .thirdparty
        .sign_in_up(
            "public",
            "google",
            provider_user_id,
            email,
            true,
            None,
            None,
            &LinkingOptions::default(),
        )
        .await?;
    match outcome {
        SignInUpOutcome::Ok { user, .. } => Ok(user),
        other => anyhow::bail!("expected ok, got {other:?}"),
    }
}

#[tokio::test]
async fn new_method_links_to_session_user_over_standalone_path() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let session_user = passwordless_user(&engine, "s@example.com", &opts).await?;
    assert!(session_user.is_primary_user);
    let session = session_for(&session_user);

    // A fresh email would normally just become its own primary user; with a
    // session it joins the session user instead.
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
    assert_eq!(user.id, session_user.id);
    assert_eq!(user.login_methods.len(), 2);
    Ok(())
}

#[tokio::test]
async fn required_session_missing_is_unauthorised() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let result = engine
        .emailpassword
        .sign_up(
            "public",
            "a@example.com",
            "password123",
            None,
            Some(true),
            &LinkingOptions::default(),
        )
        .await;
    match result {
        Err(EngineError::Session(SessionError::Unauthorised)) => Ok(()),
        other => anyhow::bail!("expected unauthorised, got {other:?}"),
    }
}

#[tokio::test]
async fn required_session_expired_asks_for_refresh() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let session_user = passwordless_user(&engine, "s@example.com", &opts).await?;
    let session = expired_session_for(&session_user);
    let result = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", Some(&session), Some(true), &opts)
        .await;
    match result {
        Err(EngineError::Session(SessionError::TryRefreshToken)) => Ok(()),
        other => anyhow::bail!("expected refresh request, got {other:?}"),
    }
}

#[tokio::test]
async fn optional_expired_session_is_ignored() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let session_user = passwordless_user(&engine, "s@example.com", &opts).await?;
    let session = expired_session_for(&session_user);

    // Without the explicit requirement the attempt proceeds sessionless.
    let outcome = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", Some(&session), None, &opts)
        .await?;
    let SignUpOutcome::Ok { user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    assert_ne!(user.id, session_user.id);
    Ok(())
}

#[tokio::test]
async fn session_user_that_cannot_become_primary_is_rejected() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    // Session user stays standalone on purpose.
    let standalone_opts = LinkingOptions {
        do_not_link: true,
        ..LinkingOptions::default()
    };
    let session_user = passwordless_user(&engine, "s@example.com", &standalone_opts).await?;
    assert!(!session_user.is_primary_user);

    // A third-party primary takes ownership of the session user's email.
    let other = thirdparty_user(&engine, "abcd", "s@example.com").await?;
    assert!(other.is_primary_user);

    let session = session_for(&session_user);
    let outcome = engine
        .emailpassword
        .sign_up(
            "public",
            "fresh@example.com",
            "password123",
            Some(&session),
            Some(true),
            &LinkingOptions::default(),
        )
        .await?;
    match outcome {
        SignUpOutcome::NotAllowed { reason } => {
            assert_eq!(
                reason.to_string(),
                "Cannot sign in / up due to security reasons. Please contact support. (ERR_CODE_023)"
            );
        }
        other => anyhow::bail!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn session_link_conflict_is_rejected_with_recipe_code() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let session_user = passwordless_user(&engine, "s@example.com", &opts).await?;
    assert!(session_user.is_primary_user);

    // Another primary owns the value the new method brings in.
    let other = thirdparty_user(&engine, "abcd", "owned@example.com").await?;
    assert!(other.is_primary_user);

    let session = session_for(&session_user);
    let created = engine
        .passwordless
        .create_code(
            "public",
            PasswordlessContact::Email("owned@example.com".to_string()),
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
    match consumed {
        ConsumeCodeOutcome::NotAllowed { reason } => {
            assert_eq!(
                reason.to_string(),
                "Cannot sign in / up due to security reasons. Please contact support. (ERR_CODE_017)"
            );
        }
        other => anyhow::bail!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unverified_session_user_fails_the_claim_check() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    // Unverified provider identity: stays standalone and unverified.
    let outcome = engine
        .thirdparty
        .sign_in_up(
            "public",
            "google",
            "abcd",
            "s@example.com",
            false,
            None,
            None,
            &LinkingOptions::default(),
        )
        .await?;
    let SignInUpOutcome::Ok { user: session_user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    assert!(!session_user.is_primary_user);

    let session = session_for(&session_user);
    let result = engine
        .emailpassword
        .sign_up(
            "public",
            "fresh@example.com",
            "password123",
            Some(&session),
            Some(true),
            &LinkingOptions::default(),
        )
        .await;
    match result {
        Err(EngineError::InvalidClaims { claim_id }) => {
            assert_eq!(claim_id, EMAIL_VERIFIED_CLAIM_ID);
            Ok(())
        }
        other => anyhow::bail!("expected claim failure, got {other:?}"),
    }
}

#[tokio::test]
async fn session_flag_false_skips_the_session_user() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let opts = LinkingOptions::default();
    let session_user = passwordless_user(&engine, "s@example.com", &opts).await?;
    let session = session_for(&session_user);

    let user = passwordless_user(&engine, "fresh@example.com", &opts).await?;
    assert_ne!(user.id, session_user.id);

    // Even with a live session attached, an explicit false keeps the
    // attempt on the sessionless path.
    let created = engine
        .passwordless
        .create_code(
            "public",
            PasswordlessContact::Email("fresh2@example.com".to_string()),
            Some(&session),
            Some(false),
            &opts,
        )
        .await?;
    let CreateCodeOutcome::Ok { device_id, code } = created else {
        anyhow::bail!("expected code, got {created:?}");
    };
    let consumed = engine
        .passwordless
        .consume_code("public", device_id, &code, Some(&session), Some(false), &opts)
        .await?;
    let ConsumeCodeOutcome::Ok { user, .. } = consumed else {
        anyhow::bail!("expected ok, got {consumed:?}");
    };
    assert_ne!(user.id, session_user.id);
    Ok(())
}
