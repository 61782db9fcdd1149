use tokio::sync::mpsc;
use tracing::Instrument;

use crate::broker::{RegisterLink, Transaction};
use crate::common::frame::TxId;

pub(crate) struct BrokerLoop<L>
where
    L: RegisterLink,
{
    rx: mpsc::Receiver<Transaction>,
    link: L,
    retry: Option<Transaction>,
    tx_id: TxId,
}

impl<L: RegisterLink> BrokerLoop<L> {
    pub(crate) fn new(rx: mpsc::Receiver<Transaction>, link: L) -> Self {
        Self {
            rx,
            link,
            retry: None,
            tx_id: TxId::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            // a transaction awaiting its retry stays ahead of everything queued behind it
            let transaction = match self.retry.take() {
                Some(transaction) => transaction,
                None => match self.rx.recv().await {
                    Some(transaction) => transaction,
                    None => {
                        tracing::info!("all broker handles dropped, stopping");
                        return;
                    }
                },
            };
            self.run_one(transaction).await;
        }
    }

    async fn run_one(&mut self, mut transaction: Transaction) {
        let tx_id = self.tx_id.next();
        let result = self
            .link
            .execute(&transaction.request)
            .instrument(tracing::info_span!("transaction", tx_id = %tx_id))
            .await;

        match result {
            Err(err) if err.is_transport() && !transaction.retried => {
                tracing::warn!("retrying {} after transport failure: {}", transaction.request, err);
                transaction.retried = true;
                self.retry = Some(transaction);
            }
            result => {
                if let Err(err) = &result {
                    tracing::warn!("{} failed: {}", transaction.request, err);
                }
                transaction.promise.complete(result);
            }
        }
    }
}
