use std::time::Duration;

use rama::{
    Layer as _, Service as _,
    error::BoxError,
    http::{
        Request, Response, client::EasyHttpWebClient,
        layer::map_request_body::MapRequestBodyLayer,
    },
    layer::{MapErrLayer, TimeoutLayer},
    service::BoxService,
};

/// Web client used to submit orders.
///
/// Every request is bounded by `timeout`. There is no retry layer:
/// a failed submission is reported once and the next iteration moves on.
pub fn new_web_client(timeout: Duration) -> BoxService<Request, Response, BoxError> {
    (
        TimeoutLayer::new(timeout),
        MapErrLayer::new(Into::<BoxError>::into),
        MapRequestBodyLayer::new_boxed_streaming_body(),
    )
        .into_layer(EasyHttpWebClient::default())
        .boxed()
}
