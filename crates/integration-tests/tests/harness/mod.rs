pub mod mock_kobold;
