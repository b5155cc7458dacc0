//! Password-reset flow across linked and standalone accounts.

use std::sync::Arc;

use ligilo::policy::{LinkIfVerified, LinkingDisabled, LinkingOptions, LinkingPolicy};
use ligilo::recipes::{
    CreateResetTokenOutcome, EmailPassword, ResetPasswordOutcome, Sha256PasswordHasher, SignInOutcome,
    SignInUpOutcome, SignUpOutcome, ThirdParty,
};
use ligilo::repo::InMemoryRepository;
use ligilo::{AccountLinker, User};

struct Engine {
    emailpassword: EmailPassword,
    thirdparty: ThirdParty,
}

fn engine(policy: Arc<dyn LinkingPolicy>) -> Engine {
    let repo = Arc::new(InMemoryRepository::new());
    let linker = AccountLinker::new(repo, policy);
    Engine {
        emailpassword: EmailPassword::new(linker.clone(), Arc::new(Sha256PasswordHasher)),
        thirdparty: ThirdParty::new(linker),
    }
}

async fn tp_user(
    engine: &Engine,
    provider_user_id: &str,
    email: &str,
    verified: bool,
    options: &LinkingOptions,
) -> anyhow::Result<User> {
    let outcome = engine
        .thirdparty
        .sign_in_up("public", "google", provider_user_id, email, verified, None, None, options)
        .await?;
    match outcome {
        SignInUpOutcome::Ok { user, .. } => Ok(user),
        other => anyhow::bail!("expected ok, got {other:?}"),
    }
}

#[tokio::test]
async fn reset_targets_the_oldest_matching_user() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    let standalone = LinkingOptions::default().with_do_not_link();
    let first = tp_user(&engine, "user1", "shared@example.com", true, &standalone).await?;
    let second = tp_user(&engine, "user2", "shared@example.com", true, &standalone).await?;
    let third = tp_user(&engine, "user3", "shared@example.com", true, &standalone).await?;
    assert!(!first.is_primary_user && !second.is_primary_user && !third.is_primary_user);
    assert_ne!(first.id, second.id);
    assert_ne!(second.id, third.id);

    let outcome = engine
        .emailpassword
        .create_password_reset_token("public", "shared@example.com")
        .await?;
    let CreateResetTokenOutcome::Ok { token, user_id } = outcome else {
        anyhow::bail!("expected token, got {outcome:?}");
    };
    assert_eq!(user_id, first.id);

    // Consuming the token attaches a password method to the first-created
    // holder and makes it primary.
    let outcome = engine
        .emailpassword
        .reset_password_using_token(&token, "newpassword123")
        .await?;
    let ResetPasswordOutcome::Ok { user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    assert_eq!(user.id, first.id);
    assert!(user.is_primary_user);
    assert_eq!(user.login_methods.len(), 2);

    let outcome = engine
        .emailpassword
        .sign_in(
            "public",
            "shared@example.com",
            "newpassword123",
            None,
            None,
            &LinkingOptions::default(),
        )
        .await?;
    let SignInOutcome::Ok { user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    assert_eq!(user.id, first.id);
    Ok(())
}

#[tokio::test]
async fn reset_refused_when_email_is_only_held_unverified() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkIfVerified));
    tp_user(&engine, "abcd", "a@example.com", false, &LinkingOptions::default()).await?;

    let outcome = engine
        .emailpassword
        .create_password_reset_token("public", "a@example.com")
        .await?;
    assert!(matches!(outcome, CreateResetTokenOutcome::NotAllowed));
    Ok(())
}

#[tokio::test]
async fn reset_updates_an_existing_password_method() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkingDisabled));
    let opts = LinkingOptions::default();
    let outcome = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", None, None, &opts)
        .await?;
    let SignUpOutcome::Ok { recipe_user_id, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };

    let outcome = engine
        .emailpassword
        .create_password_reset_token("public", "a@example.com")
        .await?;
    let CreateResetTokenOutcome::Ok { token, .. } = outcome else {
        anyhow::bail!("expected token, got {outcome:?}");
    };
    let outcome = engine
        .emailpassword
        .reset_password_using_token(&token, "newpassword456")
        .await?;
    let ResetPasswordOutcome::Ok { user, .. } = outcome else {
        anyhow::bail!("expected ok, got {outcome:?}");
    };
    // Acting on the token also proves the address.
    assert!(user.login_method(recipe_user_id).unwrap().verified);

    let outcome = engine
        .emailpassword
        .sign_in("public", "a@example.com", "password123", None, None, &opts)
        .await?;
    assert!(matches!(outcome, SignInOutcome::WrongCredentials));
    let outcome = engine
        .emailpassword
        .sign_in("public", "a@example.com", "newpassword456", None, None, &opts)
        .await?;
    assert!(matches!(outcome, SignInOutcome::Ok { .. }));
    Ok(())
}

#[tokio::test]
async fn unknown_email_and_spent_tokens_are_rejected() -> anyhow::Result<()> {
    let engine = engine(Arc::new(LinkingDisabled));
    let outcome = engine
        .emailpassword
        .create_password_reset_token("public", "nobody@example.com")
        .await?;
    assert!(matches!(outcome, CreateResetTokenOutcome::UnknownEmail));

    let outcome = engine
        .emailpassword
        .sign_up("public", "a@example.com", "password123", None, None, &LinkingOptions::default())
        .await?;
    assert!(matches!(outcome, SignUpOutcome::Ok { .. }));
    let outcome = engine
        .emailpassword
        .create_password_reset_token("public", "a@example.com")
        .await?;
    let CreateResetTokenOutcome::Ok { token, .. } = outcome else {
        anyhow::bail!("expected token, got {outcome:?}");
    };
    let outcome = engine
        .emailpassword
        .reset_password_using_token(&token, "newpassword456")
        .await?;
    assert!(matches!(outcome, ResetPasswordOutcome::Ok { .. }));
    // Tokens are single use.
    let outcome = engine
        .emailpassword
        .reset_password_using_token(&token, "anotherpass789")
        .await?;
    assert!(matches!(outcome, ResetPasswordOutcome::InvalidToken));
    Ok(())
}
