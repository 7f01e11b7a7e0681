//! Echo service: hands the caller's bytes straight back

use super::EchoCommand;
use crate::error::TeeResult;
use crate::param::Params;

pub(crate) fn handle(cmd: EchoCommand, params: &mut Params) -> TeeResult<()> {
    match cmd {
        EchoCommand::SendCmd => {
            let data = params[0].input_bytes()?.to_vec();
            params[1].write_output(&data)
        }
    }
}
