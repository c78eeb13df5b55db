mod convert;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

use self::convert::{
    donation_response, donation_status, withdrawal_response, withdrawal_status,
    withdrawal_status_filter,
};
use crate::ledger::database::{LedgerDatabase, ListFilter};
use crate::ledger::donation::{DonationService, NewDonation};
use crate::ledger::donation_state::DonationState;
use crate::ledger::otp::OtpService;
use crate::ledger::withdrawal::{WithdrawalRequest, WithdrawalService};
use crate::midtrans::MidtransProvider;
use crate::pb::donation_ledger as pb;
use crate::settings::Config;

pub struct DonationLedgerService {
    pub(crate) donations: Arc<DonationService>,
    pub(crate) withdrawals: Arc<WithdrawalService>,
}

impl DonationLedgerService {
    pub async fn try_new(cfg: Config) -> Result<Self> {
        let db = Arc::new(LedgerDatabase::new(&cfg.ledger.database_path)?);
        let midtrans = MidtransProvider::new(cfg.midtrans.clone())?;
        if midtrans.payout_gateway().is_none() {
            tracing::warn!("Iris creator key not set; approved withdrawals are paid out manually");
        }

        let state = Arc::new(DonationState::new().with_ttl(cfg.ledger.watch_session_ttl));
        let donations = DonationService::new(
            db.clone(),
            midtrans.payment_gateway(),
            state,
            cfg.ledger.donation_min_amount,
            cfg.ledger.donation_expiry,
        );
        let otp = OtpService::new(db.clone(), cfg.ledger.otp_ttl, cfg.ledger.otp_max_attempts);
        let withdrawals = WithdrawalService::new(
            db,
            otp,
            midtrans.payout_gateway(),
            cfg.ledger.withdrawal_min_amount,
        );

        Ok(Self::from_services(Arc::new(donations), Arc::new(withdrawals)))
    }

    pub fn from_services(donations: Arc<DonationService>, withdrawals: Arc<WithdrawalService>) -> Self {
        Self {
            donations,
            withdrawals,
        }
    }

    pub fn donations(&self) -> Arc<DonationService> {
        self.donations.clone()
    }

    pub fn withdrawals(&self) -> Arc<WithdrawalService> {
        self.withdrawals.clone()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[async_trait]
impl pb::donation_ledger_server::DonationLedger for DonationLedgerService {
    async fn create_donation(
        &self,
        request: Request<pb::CreateDonationRequest>,
    ) -> Result<Response<pb::DonationResponse>, Status> {
        let req = request.into_inner();
        let donation = self
            .donations
            .create(NewDonation {
                campaign_id: req.campaign_id,
                campaign_title: req.campaign_title,
                donor_name: req.donor_name,
                donor_email: non_empty(req.donor_email),
                donor_phone: non_empty(req.donor_phone),
                message: req.message,
                is_anonymous: req.is_anonymous,
                amount: req.amount,
            })
            .await
            .map_err(donation_status)?;

        debug!(order_id = %donation.order_id, "Created donation checkout");
        Ok(Response::new(donation_response(donation)))
    }

    async fn get_donation(
        &self,
        request: Request<pb::GetDonationRequest>,
    ) -> Result<Response<pb::DonationResponse>, Status> {
        let req = request.into_inner();
        let donation = self.donations.get(&req.order_id).map_err(donation_status)?;
        Ok(Response::new(donation_response(donation)))
    }

    async fn refresh_donation_status(
        &self,
        request: Request<pb::RefreshDonationStatusRequest>,
    ) -> Result<Response<pb::RefreshDonationStatusResponse>, Status> {
        let req = request.into_inner();
        let outcome = self
            .donations
            .refresh(&req.order_id)
            .await
            .map_err(donation_status)?;
        Ok(Response::new(pb::RefreshDonationStatusResponse {
            changed: outcome.change.is_updated(),
            donation: Some(outcome.donation.into()),
        }))
    }

    async fn sync_pending_donations(
        &self,
        request: Request<pb::SyncPendingDonationsRequest>,
    ) -> Result<Response<pb::SyncPendingDonationsResponse>, Status> {
        let req = request.into_inner();
        let campaign_id = non_empty(req.campaign_id);
        let report = self
            .donations
            .sync_pending(campaign_id.as_deref())
            .await
            .map_err(donation_status)?;
        Ok(Response::new(report.into()))
    }

    async fn get_campaign_summary(
        &self,
        request: Request<pb::CampaignSummaryRequest>,
    ) -> Result<Response<pb::CampaignSummary>, Status> {
        let req = request.into_inner();
        if req.campaign_id.trim().is_empty() {
            return Err(Status::invalid_argument("missing campaign_id"));
        }
        let summary = self
            .donations
            .summary(&req.campaign_id)
            .map_err(donation_status)?;
        Ok(Response::new(summary.into()))
    }

    async fn issue_withdrawal_otp(
        &self,
        request: Request<pb::IssueWithdrawalOtpRequest>,
    ) -> Result<Response<pb::IssueWithdrawalOtpResponse>, Status> {
        let req = request.into_inner();
        let issued = self
            .withdrawals
            .issue_otp(&req.campaign_id, &req.requester_id)
            .map_err(withdrawal_status)?;
        Ok(Response::new(pb::IssueWithdrawalOtpResponse {
            code: issued.code,
            expires_at: issued.expires_at,
        }))
    }

    async fn request_withdrawal(
        &self,
        request: Request<pb::RequestWithdrawalRequest>,
    ) -> Result<Response<pb::WithdrawalResponse>, Status> {
        let req = request.into_inner();
        let withdrawal = self
            .withdrawals
            .request(
                WithdrawalRequest {
                    campaign_id: req.campaign_id,
                    requester_id: req.requester_id,
                    amount: req.amount,
                    bank_code: req.bank_code,
                    account_number: req.account_number,
                    account_name: req.account_name,
                    notes: req.notes,
                },
                &req.otp,
            )
            .map_err(withdrawal_status)?;
        Ok(Response::new(withdrawal_response(withdrawal)))
    }

    async fn approve_withdrawal(
        &self,
        request: Request<pb::ApproveWithdrawalRequest>,
    ) -> Result<Response<pb::WithdrawalResponse>, Status> {
        let req = request.into_inner();
        let withdrawal = self
            .withdrawals
            .approve(&req.id)
            .await
            .map_err(withdrawal_status)?;
        Ok(Response::new(withdrawal_response(withdrawal)))
    }

    async fn reject_withdrawal(
        &self,
        request: Request<pb::RejectWithdrawalRequest>,
    ) -> Result<Response<pb::WithdrawalResponse>, Status> {
        let req = request.into_inner();
        let withdrawal = self
            .withdrawals
            .reject(&req.id, &req.reason)
            .await
            .map_err(withdrawal_status)?;
        Ok(Response::new(withdrawal_response(withdrawal)))
    }

    async fn complete_withdrawal(
        &self,
        request: Request<pb::CompleteWithdrawalRequest>,
    ) -> Result<Response<pb::WithdrawalResponse>, Status> {
        let req = request.into_inner();
        let withdrawal = self
            .withdrawals
            .complete(&req.id)
            .await
            .map_err(withdrawal_status)?;
        Ok(Response::new(withdrawal_response(withdrawal)))
    }

    async fn refresh_withdrawal_status(
        &self,
        request: Request<pb::RefreshWithdrawalStatusRequest>,
    ) -> Result<Response<pb::WithdrawalResponse>, Status> {
        let req = request.into_inner();
        let withdrawal = self
            .withdrawals
            .refresh_payout(&req.id)
            .await
            .map_err(withdrawal_status)?;
        Ok(Response::new(withdrawal_response(withdrawal)))
    }

    async fn list_withdrawals(
        &self,
        request: Request<pb::ListWithdrawalsRequest>,
    ) -> Result<Response<pb::ListWithdrawalsResponse>, Status> {
        let req = request.into_inner();
        let filter = ListFilter {
            campaign_id: non_empty(req.campaign_id),
            status: withdrawal_status_filter(req.status)?,
        };
        let withdrawals = self
            .withdrawals
            .list(&filter)
            .map_err(withdrawal_status)?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(Response::new(pb::ListWithdrawalsResponse { withdrawals }))
    }

    type WaitDonationStream = ReceiverStream<Result<pb::DonationUpdate, Status>>;

    async fn wait_donation(
        &self,
        request: Request<pb::WaitDonationRequest>,
    ) -> Result<Response<Self::WaitDonationStream>, Status> {
        let req = request.into_inner();
        self.donations.get(&req.order_id).map_err(donation_status)?;

        // subscribe before reading the current state so no update falls in between
        let mut rx = self.donations.state().register_waiter(&req.order_id).await;
        let current = self.donations.get(&req.order_id).map_err(donation_status)?;
        let (tx, rx_grpc) = tokio::sync::mpsc::channel(8);

        debug!(order_id = %req.order_id, "WaitDonation stream established");

        let first = pb::DonationUpdate {
            order_id: current.order_id.clone(),
            status: pb::DonationStatus::from(current.status) as i32,
            message: None,
        };
        if tx.send(Ok(first)).await.is_err() || current.status.is_terminal() {
            return Ok(Response::new(ReceiverStream::new(rx_grpc)));
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = rx.recv() => {
                        match update {
                            Ok(msg) => {
                                let terminal = msg.status.is_terminal();
                                let resp = pb::DonationUpdate {
                                    order_id: msg.order_id,
                                    status: pb::DonationStatus::from(msg.status) as i32,
                                    message: msg.message,
                                };
                                if tx.send(Ok(resp)).await.is_err() {
                                    debug!("WaitDonation stream closed by client");
                                    break;
                                }
                                if terminal {
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                            Err(RecvError::Lagged(_)) => continue,
                        }
                    }
                    _ = tx.closed() => {
                        debug!("WaitDonation stream closed by client");
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx_grpc)))
    }

    type WatchDonationsStream = ReceiverStream<Result<pb::DonationUpdate, Status>>;

    async fn watch_donations(
        &self,
        _request: Request<pb::WatchDonationsRequest>,
    ) -> Result<Response<Self::WatchDonationsStream>, Status> {
        let mut rx = self.donations.state().subscribe();
        let (tx, rx_grpc) = tokio::sync::mpsc::channel(32);

        debug!("WatchDonations stream established");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = rx.recv() => {
                        match update {
                            Ok(msg) => {
                                let resp = pb::DonationUpdate {
                                    order_id: msg.order_id,
                                    status: pb::DonationStatus::from(msg.status) as i32,
                                    message: msg.message,
                                };
                                if tx.send(Ok(resp)).await.is_err() {
                                    debug!("WatchDonations stream closed by client");
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(skipped, "WatchDonations subscriber lagged");
                                continue;
                            }
                        }
                    }
                    _ = tx.closed() => {
                        debug!("WatchDonations stream closed by client");
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx_grpc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::DonationStatus;
    use crate::pb::donation_ledger::donation_ledger_server::DonationLedger;
    use crate::test_support::{notification, FakePaymentGateway, FakePayoutGateway};
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use tonic::Code;

    struct Fixture {
        _dir: tempfile::TempDir,
        gateway: Arc<FakePaymentGateway>,
        svc: DonationLedgerService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDatabase::new(dir.path().join("ledger.redb")).unwrap());
        let gateway = Arc::new(FakePaymentGateway::default());
        let donations = DonationService::new(
            db.clone(),
            gateway.clone(),
            Arc::new(DonationState::new()),
            10_000,
            Duration::from_secs(3600),
        );
        let otp = OtpService::new(db.clone(), Duration::from_secs(300), 3);
        let withdrawals = WithdrawalService::new(
            db,
            otp,
            Some(Arc::new(FakePayoutGateway::new(true))),
            50_000,
        );
        Fixture {
            _dir: dir,
            gateway,
            svc: DonationLedgerService::from_services(Arc::new(donations), Arc::new(withdrawals)),
        }
    }

    async fn paid_donation(f: &Fixture, amount: i64) -> String {
        let resp = f
            .svc
            .create_donation(Request::new(pb::CreateDonationRequest {
                campaign_id: "camp-1".to_string(),
                campaign_title: "Sumur untuk Desa".to_string(),
                donor_name: "Andi".to_string(),
                amount,
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        let order_id = resp.donation.unwrap().order_id;
        f.gateway
            .set_status(notification(&order_id, "settlement", None, &format!("{amount}.00")));
        let refreshed = f
            .svc
            .refresh_donation_status(Request::new(pb::RefreshDonationStatusRequest {
                order_id: order_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(refreshed.changed);
        order_id
    }

    #[tokio::test]
    async fn donation_round_trip() {
        let f = fixture();
        let order_id = paid_donation(&f, 100_000).await;

        let donation = f
            .svc
            .get_donation(Request::new(pb::GetDonationRequest { order_id }))
            .await
            .unwrap()
            .into_inner()
            .donation
            .unwrap();
        assert_eq!(donation.status, pb::DonationStatus::Paid as i32);
        assert!(donation.paid_at.is_some());

        let summary = f
            .svc
            .get_campaign_summary(Request::new(pb::CampaignSummaryRequest {
                campaign_id: "camp-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(summary.collected, 100_000);
        assert_eq!(summary.available, 100_000);
    }

    #[tokio::test]
    async fn unknown_donation_is_not_found() {
        let f = fixture();
        let err = f
            .svc
            .get_donation(Request::new(pb::GetDonationRequest {
                order_id: "DON-missing".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        let err = f
            .svc
            .create_donation(Request::new(pb::CreateDonationRequest {
                campaign_id: "camp-1".to_string(),
                donor_name: "Andi".to_string(),
                amount: 500,
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn withdrawal_flow() {
        let f = fixture();
        paid_donation(&f, 300_000).await;

        let otp = f
            .svc
            .issue_withdrawal_otp(Request::new(pb::IssueWithdrawalOtpRequest {
                campaign_id: "camp-1".to_string(),
                requester_id: "owner-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let request = |code: String| pb::RequestWithdrawalRequest {
            campaign_id: "camp-1".to_string(),
            requester_id: "owner-1".to_string(),
            amount: 120_000,
            bank_code: "bni".to_string(),
            account_number: "0099887766".to_string(),
            account_name: "Panti Asuhan Kasih".to_string(),
            notes: None,
            otp: code,
        };

        let err = f
            .svc
            .request_withdrawal(Request::new(request("000000x".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);

        let withdrawal = f
            .svc
            .request_withdrawal(Request::new(request(otp.code)))
            .await
            .unwrap()
            .into_inner()
            .withdrawal
            .unwrap();
        assert_eq!(withdrawal.status, pb::WithdrawalStatus::Pending as i32);

        let approved = f
            .svc
            .approve_withdrawal(Request::new(pb::ApproveWithdrawalRequest {
                id: withdrawal.id.clone(),
            }))
            .await
            .unwrap()
            .into_inner()
            .withdrawal
            .unwrap();
        assert_eq!(approved.status, pb::WithdrawalStatus::Approved as i32);
        assert!(approved.reference_no.is_some());

        let listed = f
            .svc
            .list_withdrawals(Request::new(pb::ListWithdrawalsRequest {
                campaign_id: Some("camp-1".to_string()),
                status: Some(pb::WithdrawalStatus::Approved as i32),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.withdrawals.len(), 1);

        let done = f
            .svc
            .complete_withdrawal(Request::new(pb::CompleteWithdrawalRequest {
                id: withdrawal.id.clone(),
            }))
            .await
            .unwrap()
            .into_inner()
            .withdrawal
            .unwrap();
        assert_eq!(done.status, pb::WithdrawalStatus::Completed as i32);

        let err = f
            .svc
            .reject_withdrawal(Request::new(pb::RejectWithdrawalRequest {
                id: withdrawal.id,
                reason: "late".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn wait_donation_streams_until_terminal() {
        let f = fixture();
        let created = f
            .svc
            .create_donation(Request::new(pb::CreateDonationRequest {
                campaign_id: "camp-1".to_string(),
                donor_name: "Wati".to_string(),
                amount: 15_000,
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner()
            .donation
            .unwrap();

        let mut stream = f
            .svc
            .wait_donation(Request::new(pb::WaitDonationRequest {
                order_id: created.order_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, pb::DonationStatus::Pending as i32);

        let tx = notification(&created.order_id, "settlement", None, "15000.00");
        let outcome = f.svc.donations().reconcile(&tx).await.unwrap();
        assert_eq!(outcome.donation.status, DonationStatus::Paid);

        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.status, pb::DonationStatus::Paid as i32);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn watch_donations_sees_every_order() {
        let f = fixture();
        let mut stream = f
            .svc
            .watch_donations(Request::new(pb::WatchDonationsRequest {}))
            .await
            .unwrap()
            .into_inner();

        let order_id = paid_donation(&f, 25_000).await;
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.order_id, order_id);
        assert_eq!(update.status, pb::DonationStatus::Paid as i32);
    }
}
