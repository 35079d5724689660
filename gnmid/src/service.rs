//! Binds the `Gnmid` tonic service to [`gnmid_session::Session`] (§6): one
//! session per `Subscribe` call, and a thin ONCE-mode wrapper for `Get`
//! (§9 Open Questions: "Get drives a single internal ONCE session and
//! collects its batch").

use gnmid_admission::AdmissionController;
use gnmid_proto::pb::gnmid_server::Gnmid;
use gnmid_proto::pb::{self, subscribe_request, subscribe_response};
use gnmid_session::{Session, StoreRegistry};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub struct GnmidService {
    admission: AdmissionController,
    stores: StoreRegistry,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl GnmidService {
    pub fn new(admission: AdmissionController, stores: StoreRegistry, queue_capacity: usize, shutdown: CancellationToken) -> Self {
        Self {
            admission,
            stores,
            queue_capacity,
            shutdown,
        }
    }

    fn peer_of<T>(request: &Request<T>) -> String {
        request.remote_addr().map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string())
    }

    fn session(&self, peer: String) -> Session {
        Session::new(peer, self.admission.clone(), self.stores.clone(), self.queue_capacity)
    }
}

#[tonic::async_trait]
impl Gnmid for GnmidService {
    type SubscribeStream = Pin<Box<dyn Stream<Item = Result<pb::SubscribeResponse, Status>> + Send + 'static>>;

    async fn subscribe(&self, request: Request<Streaming<pb::SubscribeRequest>>) -> Result<Response<Self::SubscribeStream>, Status> {
        let peer = Self::peer_of(&request);
        let inbound: Box<dyn Stream<Item = Result<pb::SubscribeRequest, Status>> + Unpin + Send + 'static> =
            Box::new(request.into_inner());
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let session = self.session(peer);
        let shutdown = self.shutdown.child_token();

        tokio::spawn(async move {
            if let Err(err) = session.run(inbound, tx, shutdown).await {
                tracing::warn!(error = %err, "subscribe session ended with an error");
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    /// Drives a single ONCE-mode session over a synthetic one-message
    /// inbound stream, then collects the resulting `Update` frames into a
    /// batch (§6, §9 Open Questions). Forces ONCE regardless of whatever
    /// mode the embedded `SubscriptionList` names, since `Get` is defined as
    /// a snapshot-only RPC.
    async fn get(&self, request: Request<pb::GetRequest>) -> Result<Response<pb::GetResponse>, Status> {
        let peer = Self::peer_of(&request);
        let mut list = request
            .into_inner()
            .subscribe
            .ok_or_else(|| Status::invalid_argument("GetRequest has no subscribe list"))?;
        list.mode = pb::SubscriptionMode::Once as i32;

        let first = pb::SubscribeRequest {
            request: Some(subscribe_request::Request::Subscribe(list)),
        };
        let inbound: Box<dyn Stream<Item = Result<pb::SubscribeRequest, Status>> + Unpin + Send + 'static> =
            Box::new(tokio_stream::once(Ok(first)));
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let session = self.session(peer);
        let shutdown = self.shutdown.child_token();

        let run = session.run(inbound, tx, shutdown);
        let collect = async {
            let mut notifications = Vec::new();
            while let Some(item) = rx.recv().await {
                if let Ok(pb::SubscribeResponse {
                    response: Some(subscribe_response::Response::Update(update)),
                }) = item
                {
                    notifications.push(update);
                }
            }
            notifications
        };

        let (run_result, notifications) = tokio::join!(run, collect);
        run_result.map_err(Status::from)?;
        Ok(Response::new(pb::GetResponse { notification: notifications }))
    }
}
