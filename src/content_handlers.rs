use crate::{
    connection_parser::ConnectionParser,
    error::Result,
    multipart::{find_boundary, HtpMultipartType, MultipartParser},
    transaction::Data,
    HtpStatus,
};

impl ConnectionParser {
    /// Inspects the request Content-Type header and, when it carries a
    /// usable multipart/form-data boundary, attaches a multipart parser
    /// to the transaction and registers the body data callback that
    /// feeds it.
    ///
    /// Returns OK when a parser was attached, DECLINED when the request
    /// is not multipart.
    pub fn setup_request_multipart(&mut self) -> Result<()> {
        let index = self.request_tx_index().ok_or(HtpStatus::ERROR)?;
        // The stored request_content_type is only the MIME type; the
        // boundary must come from the complete header value.
        let ct = self
            .conn
            .tx(index)
            .ok_or(HtpStatus::ERROR)?
            .request_headers
            .get_nocase_nozero("content-type")
            .map(|(_, header)| header.value.clone());
        let ct = match ct {
            Some(ct) => ct,
            None => return Err(HtpStatus::DECLINED),
        };
        let mut flags = 0;
        let boundary = match find_boundary(ct.as_slice(), &mut flags) {
            Some(boundary) => boundary.to_vec(),
            None => return Err(HtpStatus::DECLINED),
        };
        let parser = MultipartParser::new(&self.cfg, &boundary, flags);
        let tx = self.conn.tx_mut(index).ok_or(HtpStatus::ERROR)?;
        tx.request_mpartp = Some(parser);
        tx.register_request_body_data(multipart_request_body_data);
        Ok(())
    }
}

/// Transaction-level body data callback that drives the multipart
/// parser. The end-of-body signal finalizes parsing and folds the text
/// parts into the transaction's request parameters.
fn multipart_request_body_data(d: &mut Data) -> Result<()> {
    let data = d.data();
    match data {
        Some(data) => {
            // Take the parser out of the transaction for the duration of
            // the call so the transaction stays borrowable.
            let mut parser = d.tx_mut().request_mpartp.take();
            if let Some(parser) = &mut parser {
                // A second invocation after finalization means the
                // transaction was fed out of order.
                if parser.gave_up_data {
                    return Err(HtpStatus::ERROR);
                }
                parser.parse(data)?;
            }
            d.tx_mut().request_mpartp = parser;
        }
        None => {
            let tx = d.tx_mut();
            if let Some(mut parser) = tx.request_mpartp.take() {
                parser.finalize()?;
                // Hand the text parameters over to the transaction.
                for part in &parser.multipart.parts {
                    if part.part_type == HtpMultipartType::TEXT {
                        if let (Some(name), Some(value)) = (&part.name, &part.value) {
                            tx.request_params.add(name.clone(), value.clone());
                        }
                    }
                }
                parser.gave_up_data = true;
                tx.request_mpartp = Some(parser);
            }
        }
    }
    Ok(())
}
