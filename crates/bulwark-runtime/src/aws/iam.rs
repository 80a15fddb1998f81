use async_trait::async_trait;
use aws_sdk_iam::types::Tag as IamTag;

use bulwark_core::ExecutionRole;

use super::{classify, invalid, present, AwsPlatform};
use crate::services::{CreateRoleRequest, IdentityService, PutRolePolicyRequest, ServiceError};

#[async_trait]
impl IdentityService for AwsPlatform {
    async fn create_role(&self, request: CreateRoleRequest) -> Result<ExecutionRole, ServiceError> {
        const OP: &str = "CreateRole";

        let mut call = self
            .iam
            .create_role()
            .role_name(&request.name)
            .assume_role_policy_document(&request.assume_role_policy)
            .description(&request.description);
        for tag in &request.tags {
            let tag = IamTag::builder()
                .key(&tag.key)
                .value(&tag.value)
                .build()
                .map_err(invalid(OP))?;
            call = call.tags(tag);
        }

        let output = call.send().await.map_err(|e| classify(OP, e))?;
        let role = output
            .role()
            .ok_or_else(|| ServiceError::malformed(OP, "response has no role"))?;

        let arn = present(role.arn())
            .ok_or_else(|| ServiceError::malformed(OP, "role has no ARN"))?;
        let name = present(role.role_name()).unwrap_or(&request.name);

        Ok(ExecutionRole {
            name: name.to_string(),
            arn: arn.to_string(),
        })
    }

    async fn put_role_policy(&self, request: PutRolePolicyRequest) -> Result<(), ServiceError> {
        self.iam
            .put_role_policy()
            .role_name(request.role_name)
            .policy_name(request.policy_name)
            .policy_document(request.document)
            .send()
            .await
            .map_err(|e| classify("PutRolePolicy", e))?;
        Ok(())
    }
}
