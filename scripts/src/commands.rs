use std::{future::Future, io, process, time::Duration};

use alloy::primitives::Address;
use tokio::signal;
use tracing::{error, info, warn};

use crate::{
    build::artifacts::ArtifactStore,
    cli::{ArtifactArgs, DeployContractsArgs, GlobalArgs, PredictAddressArgs, VerifyContractsArgs},
    constants::{
        INDEX_INITIAL_DELAY_SECS, INDEX_MAX_DELAY_SECS, RPC_CONNECT_TIMEOUT_SECS,
        STATUS_INITIAL_DELAY_SECS, STATUS_MAX_DELAY_SECS, STATUS_TIMEOUT_SECS,
    },
    deploy::{
        predict_contract_address, ContractKind, DeploymentPlan, DeploymentReport, Orchestrator,
        OrchestratorSettings,
    },
    errors::ScriptError,
    output_writer::read_deployment,
    tx::client::{create_rpc_client, fetch_transaction_count, parse_signer},
    utils::{cancellation, BackoffPolicy, CancelHandle, Cancellation},
    verify::{self, EtherscanVerifier, VerificationOutcome, VerificationRequest},
};

/// Deploy the Governor / Token pair, then verify them when an explorer key is set
pub async fn deploy_contracts(
    args: DeployContractsArgs,
    globals: &GlobalArgs,
) -> Result<(), ScriptError> {
    // Everything local is checked before the first rpc call
    let plan = load_plan(&args.artifacts)?;
    let client = create_rpc_client(
        globals.priv_key()?,
        globals.rpc_url()?,
        Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS),
    )
    .await?;

    let cancel = cancel_on_ctrl_c();
    let verifier = match (&globals.etherscan_api_key, args.skip_verify) {
        (Some(api_key), false) => Some(EtherscanVerifier::new(
            &globals.explorer_api_url,
            api_key,
            status_policy(),
            cancel.clone(),
        )?),
        (_, true) => {
            info!("Verification skipped on request");
            None
        }
        (None, false) => {
            info!("No explorer API key, skipping verification");
            None
        }
    };

    let settings = OrchestratorSettings {
        mining_timeout: Duration::from_secs(args.mining_timeout),
        indexing: indexing_policy(args.index_timeout),
        output_file: Some(args.output.clone()),
    };

    let interrupted = cancel.clone();
    match Orchestrator::new(client, verifier, settings, cancel).run(&plan).await {
        Ok(report) => {
            log_report(&report);
            info!("Deployment recorded in {}", args.output);
            Ok(())
        }
        Err(failure) => {
            error!("Deployment failed: {}", failure);
            if interrupted.is_cancelled() {
                warn!("Run interrupted by the operator at stage {:?}", failure.stage);
            }
            for contract in &failure.deployed {
                error!(
                    "{} is live at {} (tx {}, constructor {:?})",
                    contract.kind, contract.address, contract.tx_hash, contract.constructor_args
                );
            }
            if failure.deployed.len() == 1 {
                if let Some(predicted) = failure.predicted_token {
                    warn!(
                        "The Governor expects the Token at {}, only the next deployer transaction can create it there",
                        predicted
                    );
                }
            }
            Err(failure.error)
        }
    }
}

/// Print the address a contract created by the deployer will land at
pub async fn predict_address(
    args: PredictAddressArgs,
    globals: &GlobalArgs,
) -> Result<(), ScriptError> {
    let deployer = match &args.deployer {
        Some(raw) => raw
            .parse::<Address>()
            .map_err(|e| ScriptError::InvalidAddress(format!("{}: {}", raw, e)))?,
        None => parse_signer(globals.priv_key()?)?.address(),
    };
    let nonce = match args.nonce {
        Some(nonce) => nonce,
        None => {
            fetch_transaction_count(
                globals.rpc_url()?,
                deployer,
                Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS),
            )
            .await?
        }
    };

    let predicted = predict_contract_address(deployer, nonce + args.offset);
    info!(
        "Deployer {} at nonce {} creates at nonce {}: {}",
        deployer,
        nonce,
        nonce + args.offset,
        predicted
    );
    println!("{}", predicted);

    Ok(())
}

/// Verify the contracts of an earlier deployment, from its record
pub async fn verify_deployed_contracts(
    args: VerifyContractsArgs,
    globals: &GlobalArgs,
) -> Result<(), ScriptError> {
    let api_key = globals.etherscan_api_key.as_deref().ok_or_else(|| {
        ScriptError::Verification("ETHERSCAN_API_KEY is required to verify".to_string())
    })?;
    let plan = load_plan(&args.artifacts)?;
    let (governor, governor_arg) = read_deployment(&args.output, ContractKind::Governor)?;
    let (token, token_arg) = read_deployment(&args.output, ContractKind::Token)?;

    let cancel = cancel_on_ctrl_c();
    let verifier = EtherscanVerifier::new(
        &globals.explorer_api_url,
        api_key,
        status_policy(),
        cancel.clone(),
    )?;
    let requests = [
        VerificationRequest {
            kind: ContractKind::Governor,
            address: governor,
            constructor_args: vec![governor_arg],
            artifact: plan.governor,
        },
        VerificationRequest {
            kind: ContractKind::Token,
            address: token,
            constructor_args: vec![token_arg],
            artifact: plan.token,
        },
    ];

    let outcomes = verify::verify_contracts(
        &verifier,
        &requests,
        &indexing_policy(args.index_timeout),
        &cancel,
    )
    .await?;
    log_verifications(&outcomes);

    Ok(())
}

fn load_plan(args: &ArtifactArgs) -> Result<DeploymentPlan, ScriptError> {
    let store = ArtifactStore::new(&args.artifacts);
    Ok(DeploymentPlan {
        governor: store.load(&args.governor)?,
        token: store.load(&args.token)?,
    })
}

fn indexing_policy(timeout_secs: u64) -> BackoffPolicy {
    BackoffPolicy::new(
        Duration::from_secs(INDEX_INITIAL_DELAY_SECS),
        Duration::from_secs(INDEX_MAX_DELAY_SECS),
        Duration::from_secs(timeout_secs),
    )
}

fn status_policy() -> BackoffPolicy {
    BackoffPolicy::new(
        Duration::from_secs(STATUS_INITIAL_DELAY_SECS),
        Duration::from_secs(STATUS_MAX_DELAY_SECS),
        Duration::from_secs(STATUS_TIMEOUT_SECS),
    )
}

/// Cancellation fired by the first Ctrl-C, the second one exits the process
fn cancel_on_ctrl_c() -> Cancellation {
    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if watch_interrupts(signal::ctrl_c, handle).await {
            error!("Interrupted again, exiting");
            process::exit(130);
        }
    });
    cancel
}

/// Cancel on the first interrupt, then return `true` once a second one arrives
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, handle: CancelHandle) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted, cancelling the current wait... (Ctrl-C again to quit)");
    handle.cancel();

    next_interrupt().await.is_ok()
}

fn log_report(report: &DeploymentReport) {
    info!(
        "Governor deployed to {} (block {:?})",
        report.governor.address, report.governor.block_number
    );
    info!(
        "Token deployed to {} (block {:?})",
        report.token.address, report.token.block_number
    );
    log_verifications(&report.verifications);
}

fn log_verifications(outcomes: &[(ContractKind, VerificationOutcome)]) {
    for (kind, outcome) in outcomes {
        match outcome {
            VerificationOutcome::Verified => info!("{}: verified", kind),
            VerificationOutcome::AlreadyVerified => info!("{}: already verified", kind),
            VerificationOutcome::Failed(reason) => warn!("{}: not verified, {}", kind, reason),
        }
    }

    let failed = outcomes.iter().filter(|(_, outcome)| !outcome.is_success()).count();
    if failed > 0 {
        warn!(
            "{} of {} contracts not verified, run verify-contracts to retry",
            failed,
            outcomes.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tempfile::tempdir;

    use super::*;
    use crate::build::artifacts::tests::write_hardhat_artifact;

    fn globals(priv_key: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            priv_key: priv_key.map(str::to_string),
            // Nothing listens there
            rpc_url: Some("http://127.0.0.1:1".to_string()),
            etherscan_api_key: None,
            explorer_api_url: "http://127.0.0.1:1/api".to_string(),
        }
    }

    fn deploy_args(artifacts: &str, output: &str) -> DeployContractsArgs {
        DeployContractsArgs {
            artifacts: ArtifactArgs {
                artifacts: artifacts.to_string(),
                governor: "MyGovernor".to_string(),
                token: "MyToken".to_string(),
            },
            output: output.to_string(),
            mining_timeout: 5,
            index_timeout: 5,
            skip_verify: true,
        }
    }

    #[tokio::test]
    async fn functional_predict_works_offline() {
        let args = PredictAddressArgs {
            deployer: Some("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".to_string()),
            nonce: Some(2),
            offset: 1,
        };
        predict_address(args, &globals(None)).await.expect("predict");
    }

    #[tokio::test]
    async fn regression_predict_rejects_malformed_deployer() {
        let args = PredictAddressArgs {
            deployer: Some("0x1234".to_string()),
            nonce: Some(0),
            offset: 1,
        };
        let error = predict_address(args, &globals(None))
            .await
            .expect_err("expected error");
        assert!(matches!(error, ScriptError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn regression_deploy_without_key_is_a_credential_error() {
        let temp = tempdir().expect("tempdir");
        write_hardhat_artifact(temp.path(), "MyGovernor", "0x6080");
        write_hardhat_artifact(temp.path(), "MyToken", "0x6080");
        let artifacts = temp.path().to_str().expect("utf8 path");
        let output = temp.path().join("deployed.json");

        let error = deploy_contracts(
            deploy_args(artifacts, output.to_str().expect("utf8 path")),
            &globals(None),
        )
        .await
        .expect_err("expected error");
        assert!(matches!(error, ScriptError::Credential(_)));
    }

    #[tokio::test]
    async fn regression_deploy_against_dead_endpoint_is_a_connection_error() {
        let temp = tempdir().expect("tempdir");
        write_hardhat_artifact(temp.path(), "MyGovernor", "0x6080");
        write_hardhat_artifact(temp.path(), "MyToken", "0x6080");
        let artifacts = temp.path().to_str().expect("utf8 path");
        let output = temp.path().join("deployed.json");

        let error = deploy_contracts(
            deploy_args(artifacts, output.to_str().expect("utf8 path")),
            &globals(Some(
                "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            )),
        )
        .await
        .expect_err("expected error");
        assert!(matches!(error, ScriptError::Connection(_)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn regression_verify_requires_an_api_key() {
        let args = VerifyContractsArgs {
            artifacts: ArtifactArgs {
                artifacts: "artifacts".to_string(),
                governor: "MyGovernor".to_string(),
                token: "MyToken".to_string(),
            },
            output: "deployed.json".to_string(),
            index_timeout: 5,
        };
        let error = verify_deployed_contracts(args, &globals(None))
            .await
            .expect_err("expected error");
        assert!(matches!(error, ScriptError::Verification(_)));
    }

    #[tokio::test]
    async fn functional_predict_without_rpc_url_stays_offline() {
        let mut globals = globals(None);
        globals.rpc_url = None;
        let args = PredictAddressArgs {
            deployer: Some("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".to_string()),
            nonce: Some(0),
            offset: 1,
        };
        predict_address(args, &globals).await.expect("predict");
    }

    #[tokio::test]
    async fn regression_deploy_without_rpc_url_is_a_connection_error() {
        let temp = tempdir().expect("tempdir");
        write_hardhat_artifact(temp.path(), "MyGovernor", "0x6080");
        write_hardhat_artifact(temp.path(), "MyToken", "0x6080");
        let artifacts = temp.path().to_str().expect("utf8 path");
        let output = temp.path().join("deployed.json");
        let mut globals = globals(Some(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        ));
        globals.rpc_url = None;

        let error = deploy_contracts(
            deploy_args(artifacts, output.to_str().expect("utf8 path")),
            &globals,
        )
        .await
        .expect_err("expected error");
        assert!(matches!(error, ScriptError::Connection(_)));
    }

    #[tokio::test]
    async fn functional_first_interrupt_cancels_second_one_quits() {
        let (handle, cancel) = cancellation();
        let interrupts = AtomicU32::new(0);

        let quit = watch_interrupts(
            || {
                interrupts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            handle,
        )
        .await;

        assert!(quit);
        assert!(cancel.is_cancelled());
        assert_eq!(interrupts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn regression_single_interrupt_only_cancels() {
        let (handle, cancel) = cancellation();
        let interrupts = AtomicU32::new(0);

        let quit = watch_interrupts(
            || {
                let n = interrupts.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Ok(()),
                        _ => Err(io::Error::new(io::ErrorKind::Other, "signal stream closed")),
                    }
                }
            },
            handle,
        )
        .await;

        assert!(!quit);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn regression_failed_handler_never_cancels() {
        let (handle, cancel) = cancellation();
        let quit = watch_interrupts(
            || async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) },
            handle,
        )
        .await;

        assert!(!quit);
        assert!(!cancel.is_cancelled());
    }
}
