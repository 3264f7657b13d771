//! Remote provisioning: server authentication, download and installation

use log::debug;
use serde::Serialize;

use super::{
    check_simple_error, device_capabilities, encode_device_id, parse_response, tac,
    BoundProfilePackage, EuiccPort,
};
use crate::apdu::Response;
use crate::channel::SecureElement;
use crate::error::{EuiccError, Operation, Result};
use crate::tlv::{decode, tags, TLVBuilder, TLV};

/// Reason given to the eUICC when a download session is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum CancelReason {
    EndUserRejection = 0,
    Postponed = 1,
    Timeout = 2,
    PprNotAllowed = 3,
}

impl CancelReason {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Keep loading until the installation result shows up early
fn continue_loading(response: &Response) -> bool {
    let data = &response.data;
    if data.len() > 2 && data[..2] == [0xBF, 0x37] {
        debug!("Bound profile package loading stopped by an early installation result");
        return false;
    }
    true
}

/// Fail with the code of an `A1 { 02 }` error node
fn check_authentication_error(root: &TLV, operation: Operation) -> Result<()> {
    if let Ok(error) = root.child(&[tags::CTX_COMP_1, tags::UNI_2]) {
        return Err(EuiccError::operation_failed(operation, error.as_integer()?));
    }
    Ok(())
}

impl<E: SecureElement> EuiccPort<E> {
    /// Fresh eUICC challenge for server authentication
    pub async fn get_euicc_challenge(&self) -> Result<Vec<u8>> {
        let request = TLVBuilder::new(tags::GET_EUICC_CHALLENGE).build();
        self.send_request(request, |data| {
            Ok(parse_response(data)?.child(&[tags::CTX_0])?.as_bytes()?.to_vec())
        })
        .await
    }

    /// Raw `EUICCInfo1`
    pub async fn get_euicc_info1(&self) -> Result<Vec<u8>> {
        let request = TLVBuilder::new(tags::GET_EUICC_INFO_1).build();
        self.send_request(request, |data| Ok(data.to_vec())).await
    }

    /// Raw `EUICCInfo2`
    pub async fn get_euicc_info2(&self) -> Result<Vec<u8>> {
        let request = TLVBuilder::new(tags::GET_EUICC_INFO_2).build();
        self.send_request(request, |data| Ok(data.to_vec())).await
    }

    /// Let the eUICC authenticate the SM-DP+
    ///
    /// The server values are complete encoded nodes as received from the
    /// SM-DP+. Returns the encoded `AuthenticateServerResponse`.
    pub async fn authenticate_server(
        &self,
        matching_id: &str,
        server_signed1: &[u8],
        server_signature1: &[u8],
        euicc_ci_pk_id: &[u8],
        server_certificate: &[u8],
    ) -> Result<Vec<u8>> {
        let server_nodes = [
            decode(server_signed1)?,
            decode(server_signature1)?,
            decode(euicc_ci_pk_id)?,
            decode(server_certificate)?,
        ];
        let capabilities = device_capabilities(&self.config().device_capabilities);
        let imei = self.device_id.clone();
        let matching_id = matching_id.to_string();

        self.send_with(
            move |version, builder| {
                let device_id = encode_device_id(imei.as_deref(), version);
                let device_info = TLVBuilder::new(tags::CTX_COMP_1)
                    .add_bytes(tags::CTX_0, &tac(&device_id))
                    .add(capabilities)
                    .add_bytes(tags::CTX_2, &device_id);
                let ctx_params = TLVBuilder::new(tags::CTX_COMP_0)
                    .add_string(tags::CTX_0, &matching_id)
                    .add_builder(device_info);

                let mut request = TLVBuilder::new(tags::AUTHENTICATE_SERVER);
                for node in server_nodes {
                    request = request.add(node);
                }
                builder.add_store_data(&request.add_builder(ctx_params).build().encode());
                Ok(())
            },
            |data| {
                let root = parse_response(data)?;
                check_authentication_error(&root, Operation::AuthenticateServer)?;
                Ok(root.raw().into_owned())
            },
            None,
        )
        .await
    }

    /// Have the eUICC prepare for the download and sign the session
    ///
    /// `hash_cc` is the hashed confirmation code when one was requested.
    /// Returns the encoded `PrepareDownloadResponse`.
    pub async fn prepare_download(
        &self,
        hash_cc: Option<&[u8]>,
        smdp_signed2: &[u8],
        smdp_signature2: &[u8],
        smdp_certificate: &[u8],
    ) -> Result<Vec<u8>> {
        let mut request = TLVBuilder::new(tags::PREPARE_DOWNLOAD)
            .add(decode(smdp_signed2)?)
            .add(decode(smdp_signature2)?);
        if let Some(hash_cc) = hash_cc {
            request = request.add_bytes(tags::UNI_4, hash_cc);
        }
        let request = request.add(decode(smdp_certificate)?).build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            check_authentication_error(&root, Operation::PrepareDownload)?;
            Ok(root.raw().into_owned())
        })
        .await
    }

    /// Install a bound profile package
    ///
    /// From SGP.22 2.1 on a malformed package is rejected before anything
    /// is sent. Returns the encoded `ProfileInstallationResult`.
    pub async fn load_bound_profile_package(&self, package: &[u8]) -> Result<Vec<u8>> {
        let package = BoundProfilePackage::parse(package)?;

        self.send_with(
            move |version, builder| {
                package.validate(version)?;
                for payload in package.payloads() {
                    builder.add_store_data(&payload);
                }
                Ok(())
            },
            |data| {
                let root = parse_response(data)?;
                if let Ok(error) = root.child(&[
                    tags::PROFILE_INSTALLATION_RESULT_DATA,
                    tags::CTX_COMP_2,
                    tags::CTX_COMP_1,
                    tags::CTX_1,
                ]) {
                    return Err(EuiccError::OperationFailed {
                        operation: Operation::LoadBoundProfilePackage,
                        code: error.as_integer()?,
                        detail: Some(error.clone()),
                    });
                }
                Ok(root.raw().into_owned())
            },
            Some(continue_loading),
        )
        .await
    }

    /// Abandon the download session `transaction_id`
    ///
    /// Returns the encoded `CancelSessionResponse`.
    pub async fn cancel_session(
        &self,
        transaction_id: &[u8],
        reason: CancelReason,
    ) -> Result<Vec<u8>> {
        let request = TLVBuilder::new(tags::CANCEL_SESSION)
            .add_bytes(tags::CTX_0, transaction_id)
            .add_integer(tags::CTX_1, reason.code())
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            check_simple_error(&root, Operation::CancelSession)?;
            Ok(root.raw().into_owned())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::SW;
    use crate::card::SpecVersion;
    use crate::port::bpp::tests::VALID_BPP;
    use crate::port::tests::port_with;

    #[tokio::test]
    async fn test_get_euicc_challenge() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF2E0680040102030A");
        assert_eq!(port.get_euicc_challenge().await.unwrap(), vec![1, 2, 3, 10]);
        assert_eq!(port.element().sent_payloads(), vec![vec![0xBF, 0x2E, 0x00]]);
    }

    #[tokio::test]
    async fn test_get_euicc_info() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF20058203020100");
        port.element().push_data("BF2203810102");

        assert_eq!(
            port.get_euicc_info1().await.unwrap(),
            hex::decode("BF20058203020100").unwrap()
        );
        assert_eq!(port.get_euicc_info2().await.unwrap(), hex::decode("BF2203810102").unwrap());
        assert_eq!(
            port.element().sent_payloads(),
            vec![vec![0xBF, 0x20, 0x00], vec![0xBF, 0x22, 0x00]]
        );
    }

    #[tokio::test]
    async fn test_authenticate_server() {
        let port = port_with(SpecVersion::V2_1).with_device_id("358240051111110");
        port.element().push_data("BF38038001AA");

        let response = port
            .authenticate_server(
                "ABCD",
                &[0x30, 0x00],
                &[0x5F, 0x37, 0x00],
                &[0x04, 0x00],
                &[0x30, 0x00],
            )
            .await
            .unwrap();
        assert_eq!(response, hex::decode("BF38038001AA").unwrap());

        let request = hex::encode_upper(&port.element().sent_payloads()[0]);
        assert_eq!(
            request,
            "BF383430005F370004003000A029800441424344A121800453280450A10F80030B000081030B\
             000085030B00008208532804501111110F"
        );
    }

    #[tokio::test]
    async fn test_authenticate_server_error() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3808A106020102800100");
        let err = port
            .authenticate_server("", &[0x30, 0x00], &[0x30, 0x00], &[0x04, 0x00], &[0x30, 0x00])
            .await
            .unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::AuthenticateServer, 2)));
    }

    #[tokio::test]
    async fn test_prepare_download() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF2103800101");
        port.prepare_download(
            Some(&[0xAA, 0xBB]),
            &[0x30, 0x00],
            &[0x5F, 0x37, 0x00],
            &[0x30, 0x00],
        )
        .await
        .unwrap();
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF210B30005F37000402AABB3000"
        );

        port.element().push_data("BF2105A103020105");
        let err = port
            .prepare_download(None, &[0x30, 0x00], &[0x30, 0x00], &[0x30, 0x00])
            .await
            .unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::PrepareDownload, 5)));
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[1]),
            "BF2106300030003000"
        );
    }

    #[tokio::test]
    async fn test_load_bound_profile_package() {
        let port = port_with(SpecVersion::V2_1);
        for _ in 0..7 {
            port.element().push_data("");
        }
        port.element().push_data("BF3706BF2703800101");

        let result = port
            .load_bound_profile_package(&hex::decode(VALID_BPP).unwrap())
            .await
            .unwrap();
        assert_eq!(result, hex::decode("BF3706BF2703800101").unwrap());

        let payloads = port.element().sent_payloads();
        assert_eq!(payloads.len(), 8);
        assert_eq!(hex::encode_upper(&payloads[0]), "BF3629BF23058003010203");
        assert_eq!(hex::encode_upper(&payloads[7]), "8603EEEEEE");
    }

    #[tokio::test]
    async fn test_load_bound_profile_package_early_result() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("");
        port.element().push_data("");
        // BF37 { BF27 { A2 { A1 { 80 01, 81 08 } } } } after the third payload
        port.element().push_data("BF370DBF270AA208A106800101810108");

        let err = port
            .load_bound_profile_package(&hex::decode(VALID_BPP).unwrap())
            .await
            .unwrap_err();
        match err {
            EuiccError::OperationFailed {
                operation,
                code,
                detail,
            } => {
                assert_eq!(operation, Operation::LoadBoundProfilePackage);
                assert_eq!(code, 8);
                assert_eq!(detail.unwrap().tag, tags::CTX_1);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(port.element().sent_payloads().len(), 3);
        assert_eq!(port.element().closed(), 1);
    }

    #[tokio::test]
    async fn test_load_malformed_package_sends_nothing() {
        let port = port_with(SpecVersion::V2_1);
        let result = port
            .load_bound_profile_package(
                &hex::decode("BF3618BF23058003010203A0058703AAAAAAA1058803BBBBBBA300").unwrap(),
            )
            .await;
        assert!(matches!(result, Err(EuiccError::MalformedPackage(_))));
        assert!(port.element().sent().is_empty());
    }

    #[tokio::test]
    async fn test_load_status_failure() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("");
        port.element().push_status(SW::WRONG_DATA);
        let result = port
            .load_bound_profile_package(&hex::decode(VALID_BPP).unwrap())
            .await;
        assert!(matches!(result, Err(EuiccError::CommandFailed(_))));
        assert_eq!(port.element().sent_payloads().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_session() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF41038001AA");
        let response = port
            .cancel_session(&[0x01, 0x02], CancelReason::Timeout)
            .await
            .unwrap();
        assert_eq!(response, hex::decode("BF41038001AA").unwrap());
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF410780020102810102"
        );

        port.element().push_data("BF4103810105");
        let err = port
            .cancel_session(&[0x01], CancelReason::EndUserRejection)
            .await
            .unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::CancelSession, 5)));
    }
}
