use async_trait::async_trait;
use custody_operator::auth::PassphraseProvider;
use custody_operator::{OperatorError, OperatorResult};
use tokio::task::JoinError;
use zeroize::Zeroizing;

/// Prompts on the controlling terminal, only when the key is encrypted.
pub struct TtyPassphrase;

#[async_trait]
impl PassphraseProvider for TtyPassphrase {
    async fn passphrase(&self) -> OperatorResult<Zeroizing<String>> {
        let prompt = tokio::task::spawn_blocking(|| {
            rpassword::read_password_from_tty(Some("Enter password: "))
        })
        .await;
        from_prompt(prompt)
    }
}

/// A closed terminal or a failed prompt task counts as no passphrase given.
fn from_prompt(
    prompt: Result<std::io::Result<String>, JoinError>,
) -> OperatorResult<Zeroizing<String>> {
    match prompt {
        Ok(Ok(passphrase)) => Ok(Zeroizing::new(passphrase)),
        Ok(Err(_)) | Err(_) => Err(OperatorError::WrongPassphrase),
    }
}
